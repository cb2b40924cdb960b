//! # tourist-proximity
//!
//! Nearest-facility annotation for tourist sites and visit spots.
//!
//! ## Features
//!
//! - **Reference sets**: immutable, projected collections of transit hubs or
//!   medical practices, with an R-tree over them
//! - **Deterministic resolution**: first-minimum tie-break, identical for the
//!   linear scan and the R-tree
//! - **Annotation pipeline**: centroid-based distances in kilometres, rounded
//!   to two decimals, optionally in parallel
//! - **Joins**: inner key joins and spatial joins against region layers, with
//!   unmatched-row counts
//! - **Projection**: any EPSG pair PROJ can transform, typically WGS84 into
//!   Irish Transverse Mercator
//!
//! ## Example
//!
//! ```
//! use tourist_proximity::prelude::*;
//! use geo::Point;
//!
//! let itm = Identity(Crs::IrishTransverseMercator);
//!
//! let transit = ReferenceSet::build(
//!     "transit",
//!     vec![
//!         RawRecord::new("0", "CENTRAL STATION", Some(Point::new(0.0, 0.0))),
//!         RawRecord::new("1", "NORTH HALT", Some(Point::new(10.0, 0.0))),
//!     ],
//!     &itm,
//! )
//! .unwrap();
//!
//! let medical = ReferenceSet::build(
//!     "medical",
//!     vec![RawRecord::new("0", "CITY CENTRE SURGERY", Some(Point::new(2500.0, 0.0)))],
//!     &itm,
//! )
//! .unwrap();
//!
//! let pipeline = AnnotationPipeline::new(transit, medical).unwrap();
//! let spot = QueryRecord::new("spot", "Spot", Some(QueryGeometry::Point(Point::new(3.0, 0.0))));
//!
//! let annotated = pipeline.annotate(&[spot]).unwrap();
//! assert_eq!(&*annotated[0].transit.name, "Central Station");
//! assert_eq!(annotated[0].transit.distance_km, 0.0);
//! assert_eq!(&*annotated[0].medical.name, "CITY CENTRE SURGERY");
//! assert_eq!(annotated[0].medical.distance_km, 2.5);
//! ```

pub mod annotate;
pub mod crs;
pub mod identifiers;
pub mod merge;
pub mod models;
pub mod reference;
pub mod resolver;
pub mod spatial;

// Re-exports for convenience
pub mod prelude {
    pub use crate::annotate::{
        title_case, AnnotateOptions, AnnotationPipeline, ANNOTATION_COLUMNS, MEDICAL_DISTANCE_KM, NEAREST_MEDICAL_NAME,
        NEAREST_TRANSIT_NAME, SITE_ID, TRANSIT_DISTANCE_KM,
    };
    pub use crate::crs::{projector, Crs, Identity, ProjTransform, Projector};
    pub use crate::identifiers::*;
    pub use crate::merge::{
        merge, spatial_join, JoinMode, MergeOptions, MergeOutcome, Region, RegionLayer, SpatialJoinOptions,
        SpatialPredicate,
    };
    pub use crate::models::{table::*, types::*};
    pub use crate::reference::ReferenceSet;
    pub use crate::resolver::{resolve, resolve_indexed, Nearest, NearestNeighbor, ResolveStrategy};
    pub use crate::spatial::{euclidean_distance, meters_to_km};
}

pub use prelude::*;
