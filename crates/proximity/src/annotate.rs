//! Distance annotation of sites and visit spots.
//!
//! Each query record is located in the working CRS (centroid for areas),
//! resolved against the transit and the medical reference sets, and mapped
//! to a new [`AnnotatedRecord`]. Records are independent, so the work is
//! spread over rayon workers when the `parallel` feature is on; output order
//! always follows input order.

use std::sync::Arc;

use geo::{Area, Centroid, MapCoords, Point};

use crate::crs::{Crs, Identity, Projector};
use crate::models::table::{Row, Table, Value};
use crate::models::types::*;
use crate::reference::ReferenceSet;
use crate::resolver::{NearestNeighbor, ResolveStrategy};
use crate::spatial::queries::meters_to_km;

pub const SITE_ID: &str = "site_id";
pub const NEAREST_TRANSIT_NAME: &str = "nearest_transit_name";
pub const TRANSIT_DISTANCE_KM: &str = "transit_distance_km";
pub const NEAREST_MEDICAL_NAME: &str = "nearest_medical_name";
pub const MEDICAL_DISTANCE_KM: &str = "medical_distance_km";

/// Columns of [`AnnotatedRecord::to_table`], in order.
pub const ANNOTATION_COLUMNS: [&str; 5] = [
    SITE_ID,
    NEAREST_TRANSIT_NAME,
    TRANSIT_DISTANCE_KM,
    NEAREST_MEDICAL_NAME,
    MEDICAL_DISTANCE_KM,
];

#[derive(Clone, Copy, Debug)]
pub struct AnnotateOptions {
    pub strategy: ResolveStrategy,
    /// Only honoured with the `parallel` feature
    pub parallel: bool,
}

impl Default for AnnotateOptions {
    fn default() -> Self {
        Self {
            strategy: ResolveStrategy::default(),
            parallel: cfg!(feature = "parallel"),
        }
    }
}

pub struct AnnotationPipeline {
    transit: ReferenceSet,
    medical: ReferenceSet,
    projector: Box<dyn Projector>,
    options: AnnotateOptions,
}

impl AnnotationPipeline {
    /// Both sets must share one projected CRS.
    pub fn new(transit: ReferenceSet, medical: ReferenceSet) -> Result<Self> {
        if transit.crs() != medical.crs() {
            return Err(ProximityError::CrsMismatch {
                expected: transit.crs(),
                found: medical.crs(),
            });
        }
        transit.crs().ensure_projected()?;

        let working = transit.crs();
        Ok(Self {
            transit,
            medical,
            projector: Box::new(Identity(working)),
            options: AnnotateOptions::default(),
        })
    }

    /// Sets the source-to-working projection for query geometries.
    pub fn with_projector(mut self, projector: Box<dyn Projector>) -> Result<Self> {
        if projector.target() != self.working_crs() {
            return Err(ProximityError::CrsMismatch {
                expected: self.working_crs(),
                found: projector.target(),
            });
        }
        self.projector = projector;
        Ok(self)
    }

    pub fn with_options(mut self, options: AnnotateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn working_crs(&self) -> Crs {
        self.transit.crs()
    }

    /// CRS the query geometries are expected in.
    pub fn source_crs(&self) -> Crs {
        self.projector.source()
    }

    /// Annotates every record or fails on the first bad one.
    pub fn annotate(&self, records: &[QueryRecord]) -> Result<Vec<AnnotatedRecord>> {
        tracing::debug!(
            records = records.len(),
            transit = self.transit.len(),
            medical = self.medical.len(),
            strategy = ?self.options.strategy,
            "annotating query records"
        );

        let annotated = self.map_records(records)?;

        tracing::info!(records = annotated.len(), "annotated query records");
        Ok(annotated)
    }

    #[cfg(feature = "parallel")]
    fn map_records(&self, records: &[QueryRecord]) -> Result<Vec<AnnotatedRecord>> {
        use rayon::prelude::*;

        if self.options.parallel {
            // Collected per record first so the reported failure is the earliest in input order
            let results: Vec<Result<AnnotatedRecord>> = records.par_iter().map(|r| self.annotate_one(r)).collect();
            results.into_iter().collect()
        } else {
            records.iter().map(|r| self.annotate_one(r)).collect()
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn map_records(&self, records: &[QueryRecord]) -> Result<Vec<AnnotatedRecord>> {
        records.iter().map(|r| self.annotate_one(r)).collect()
    }

    pub fn annotate_one(&self, record: &QueryRecord) -> Result<AnnotatedRecord> {
        let query_location = self.query_location(record)?;

        let transit = self.options.strategy.nearest(query_location, &self.transit)?;
        let medical = self.options.strategy.nearest(query_location, &self.medical)?;

        Ok(AnnotatedRecord {
            record: record.clone(),
            query_location,
            transit: NearestFacility {
                name: title_case(&transit.name).into(),
                distance_km: meters_to_km(transit.distance_m),
            },
            medical: NearestFacility {
                // Case preserved: joined later against an exact-case key
                name: medical.name,
                distance_km: meters_to_km(medical.distance_m),
            },
        })
    }

    /// Point to measure from, in the working CRS.
    pub fn query_location(&self, record: &QueryRecord) -> Result<Point> {
        let invalid = |reason: String| ProximityError::InvalidGeometry {
            id: record.id.clone(),
            reason,
        };

        let geometry = record
            .geometry
            .as_ref()
            .ok_or_else(|| invalid("missing geometry".to_string()))?;

        let project = |c: geo::Coord| -> Result<geo::Coord> {
            let p = self.projector.project(Point::from(c))?;
            Ok(p.0)
        };

        let location = match geometry {
            QueryGeometry::Point(p) => self.projector.project(*p).map_err(|e| invalid(e.to_string()))?,
            QueryGeometry::Polygon(poly) => {
                let projected = poly.try_map_coords(project).map_err(|e| invalid(e.to_string()))?;
                area_centroid(&projected).ok_or_else(|| invalid("degenerate or empty polygon".to_string()))?
            }
            QueryGeometry::MultiPolygon(mp) => {
                let projected = mp.try_map_coords(project).map_err(|e| invalid(e.to_string()))?;
                area_centroid(&projected).ok_or_else(|| invalid("degenerate or empty multipolygon".to_string()))?
            }
        };

        if !location.x().is_finite() || !location.y().is_finite() {
            return Err(invalid(format!(
                "non-finite location ({}, {})",
                location.x(),
                location.y()
            )));
        }

        Ok(location)
    }
}

/// Centroid of an area with non-zero extent.
fn area_centroid<G>(geometry: &G) -> Option<Point>
where
    G: Area<f64> + Centroid<Output = Option<Point>>,
{
    if geometry.unsigned_area() > 0.0 {
        geometry.centroid()
    } else {
        None
    }
}

/// Title-cases each run of cased letters: the first letter of a run goes to
/// its title form and the rest are lower-cased.
///
/// `"MAIN STREET STATION"` becomes `"Main Street Station"`. Uncased
/// characters (digits, punctuation, CJK) end a run, and a letter whose
/// upper case expands keeps only its first character upper (`"ß"` gives `"Ss"`).
pub fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut previous_is_cased = false;

    for c in name.chars() {
        if previous_is_cased {
            out.extend(c.to_lowercase());
        } else {
            let mut upper = c.to_uppercase();
            out.extend(upper.next());
            out.extend(upper.flat_map(char::to_lowercase));
        }
        previous_is_cased = c.is_lowercase() || c.is_uppercase();
    }

    out
}

impl AnnotatedRecord {
    /// Flat table of annotations with the source geometry attached.
    pub fn to_table(records: &[AnnotatedRecord], source_crs: Crs) -> Result<Table> {
        let mut table = Table::new(ANNOTATION_COLUMNS).with_crs(source_crs);

        for annotated in records {
            let mut row = Row::new(vec![
                Value::from(annotated.record.id.as_str()),
                Value::from(&*annotated.transit.name),
                Value::Number(annotated.transit.distance_km),
                Value::from(&*annotated.medical.name),
                Value::Number(annotated.medical.distance_km),
            ]);
            row.geometry = annotated.record.geometry.clone().map(Into::into);
            table.push_row(row)?;
        }

        Ok(table)
    }

    pub fn transit_name(&self) -> &Arc<str> {
        &self.transit.name
    }

    pub fn medical_name(&self) -> &Arc<str> {
        &self.medical.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::ProjTransform;
    use crate::identifiers::{EntityIdentifier, RecordIdentifier};
    use geo::polygon;

    const ITM: Crs = Crs::IrishTransverseMercator;

    fn set_of(label: &str, points: &[(&str, f64, f64)]) -> ReferenceSet {
        let entities = points
            .iter()
            .enumerate()
            .map(|(i, (name, x, y))| PointEntity {
                id: EntityIdentifier::from_index(i),
                name: (*name).into(),
                location: Point::new(*x, *y),
            })
            .collect();
        ReferenceSet::from_entities(label, ITM, entities)
    }

    fn pipeline() -> AnnotationPipeline {
        let transit = set_of(
            "transit",
            &[("CENTRAL STATION", 0.0, 0.0), ("NORTH HALT", 10.0, 0.0)],
        );
        let medical = set_of(
            "medical",
            &[("CITY CENTRE SURGERY", 2_000.0, 0.0), ("Harbour Medical Practice", 0.0, 5_000.0)],
        );
        AnnotationPipeline::new(transit, medical).unwrap()
    }

    #[test]
    fn test_point_query() {
        let record = QueryRecord::new("spot", "Spot", Some(QueryGeometry::Point(Point::new(3.0, 0.0))));
        let annotated = pipeline().annotate(&[record]).unwrap();

        assert_eq!(annotated.len(), 1);
        assert_eq!(&*annotated[0].transit.name, "Central Station");
        assert_eq!(annotated[0].transit.distance_km, 0.0);
        assert_eq!(&*annotated[0].medical.name, "CITY CENTRE SURGERY");
        assert_eq!(annotated[0].medical.distance_km, 2.0);
    }

    #[test]
    fn test_polygon_uses_centroid() {
        let square = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0), (x: 0.0, y: 0.0)];
        let record = QueryRecord::new("garden", "Garden", Some(QueryGeometry::Polygon(square)));

        let annotated = pipeline().annotate_one(&record).unwrap();
        assert_eq!(annotated.query_location, Point::new(1.0, 1.0));

        // 2000 - 1 east, 1 north of the surgery: sqrt(1999^2 + 1) m
        let expected = meters_to_km((1999.0f64 * 1999.0 + 1.0).sqrt());
        assert_eq!(annotated.medical.distance_km, expected);
    }

    #[test]
    fn test_name_casing_asymmetry() {
        let transit = set_of("transit", &[("MAIN STREET STATION", 0.0, 0.0)]);
        let medical = set_of("medical", &[("CITY CENTRE SURGERY", 0.0, 0.0)]);
        let pipeline = AnnotationPipeline::new(transit, medical).unwrap();

        let record = QueryRecord::new("q", "Q", Some(QueryGeometry::Point(Point::new(1.0, 1.0))));
        let annotated = pipeline.annotate_one(&record).unwrap();

        assert_eq!(&**annotated.transit_name(), "Main Street Station");
        assert_eq!(annotated.medical_name().as_bytes(), b"CITY CENTRE SURGERY");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("MAIN STREET STATION"), "Main Street Station");
        assert_eq!(title_case("great victoria st."), "Great Victoria St.");
        assert_eq!(title_case("o'neill road"), "O'Neill Road");
        assert_eq!(title_case("newry-buscentre"), "Newry-Buscentre");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn test_title_case_non_latin() {
        assert_eq!(title_case("STRAßE"), "Straße");
        assert_eq!(title_case("ßtation"), "Sstation");
        assert_eq!(title_case("東京STATION"), "東京Station");
        assert_eq!(title_case("a東b"), "A東B");
        assert_eq!(title_case("2ND AVENUE"), "2Nd Avenue");
    }

    #[test]
    fn test_missing_geometry_names_record() {
        let records = vec![
            QueryRecord::new("ok", "Ok", Some(QueryGeometry::Point(Point::new(1.0, 0.0)))),
            QueryRecord::new("broken", "Broken", None),
        ];

        // All or nothing: the valid record does not come back alone
        match pipeline().annotate(&records) {
            Err(ProximityError::InvalidGeometry { id, .. }) => assert_eq!(id.as_str(), "broken"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_degenerate_polygon_fails() {
        let flat = polygon![(x: 0.0, y: 0.0), (x: 5.0, y: 0.0), (x: 10.0, y: 0.0), (x: 0.0, y: 0.0)];
        let record = QueryRecord::new("flat", "Flat", Some(QueryGeometry::Polygon(flat)));
        assert!(matches!(
            pipeline().annotate_one(&record),
            Err(ProximityError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_empty_reference_set_is_fatal() {
        let transit = set_of("transit", &[("A", 0.0, 0.0)]);
        let medical = set_of("medical", &[]);
        let pipeline = AnnotationPipeline::new(transit, medical).unwrap();

        let record = QueryRecord::new("q", "Q", Some(QueryGeometry::Point(Point::new(1.0, 1.0))));
        assert!(matches!(
            pipeline.annotate(&[record]),
            Err(ProximityError::EmptyReferenceSet(ref label)) if label == "medical"
        ));
    }

    #[test]
    fn test_mismatched_sets_are_refused() {
        let transit = set_of("transit", &[("A", 0.0, 0.0)]);
        let medical = ReferenceSet::from_entities("medical", Crs::Utm { zone: 29, north: true }, Vec::new());
        assert!(matches!(
            AnnotationPipeline::new(transit, medical),
            Err(ProximityError::CrsMismatch { .. })
        ));
    }

    #[test]
    fn test_wgs84_queries_are_projected() {
        let itm = ProjTransform::new(Crs::Wgs84, ITM).unwrap();
        let origin = itm.project(Point::new(-8.0, 53.5)).unwrap();

        let transit = set_of("transit", &[("ORIGIN HALT", origin.x(), origin.y())]);
        let medical = set_of("medical", &[("Origin Surgery", origin.x() + 1_500.0, origin.y())]);
        let pipeline = AnnotationPipeline::new(transit, medical)
            .unwrap()
            .with_projector(Box::new(itm))
            .unwrap();

        assert_eq!(pipeline.source_crs(), Crs::Wgs84);

        let record = QueryRecord::new("o", "O", Some(QueryGeometry::Point(Point::new(-8.0, 53.5))));
        let annotated = pipeline.annotate_one(&record).unwrap();
        assert_eq!(annotated.transit.distance_km, 0.0);
        assert_eq!(annotated.medical.distance_km, 1.5);

        // The record keeps its WGS84 geometry for output
        assert_eq!(annotated.record.geometry, Some(QueryGeometry::Point(Point::new(-8.0, 53.5))));
    }

    #[test]
    fn test_projector_target_must_match() {
        let result = pipeline().with_projector(Box::new(ProjTransform::new(Crs::Wgs84, Crs::Utm { zone: 29, north: true }).unwrap()));
        assert!(matches!(result, Err(ProximityError::CrsMismatch { .. })));
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let records: Vec<QueryRecord> = (0..200)
            .map(|i| {
                QueryRecord::new(
                    RecordIdentifier::from_index(i),
                    format!("spot {i}"),
                    Some(QueryGeometry::Point(Point::new(i as f64 * 37.0, (i % 13) as f64 * 411.0))),
                )
            })
            .collect();

        let sequential = pipeline()
            .with_options(AnnotateOptions {
                strategy: ResolveStrategy::LinearScan,
                parallel: false,
            })
            .annotate(&records)
            .unwrap();
        let parallel = pipeline()
            .with_options(AnnotateOptions {
                strategy: ResolveStrategy::RTree,
                parallel: true,
            })
            .annotate(&records)
            .unwrap();

        assert_eq!(sequential, parallel);
        assert_eq!(sequential[17].record.id, RecordIdentifier::from_index(17));
    }

    #[test]
    fn test_parallel_reports_earliest_failure() {
        let records: Vec<QueryRecord> = (0..400)
            .map(|i| {
                let geometry = match i {
                    37 | 311 => None,
                    _ => Some(QueryGeometry::Point(Point::new(i as f64, 0.0))),
                };
                QueryRecord::new(RecordIdentifier::from_index(i), format!("spot {i}"), geometry)
            })
            .collect();

        let parallel = pipeline().with_options(AnnotateOptions {
            strategy: ResolveStrategy::RTree,
            parallel: true,
        });

        for _ in 0..10 {
            match parallel.annotate(&records) {
                Err(ProximityError::InvalidGeometry { id, .. }) => assert_eq!(id.as_str(), "37"),
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[test]
    fn test_to_table_columns() {
        let record = QueryRecord::new("Mount Stewart", "Mount Stewart", Some(QueryGeometry::Point(Point::new(3.0, 0.0))));
        let annotated = pipeline().annotate(&[record]).unwrap();

        let table = AnnotatedRecord::to_table(&annotated, ITM).unwrap();
        assert_eq!(table.columns(), ANNOTATION_COLUMNS);
        assert_eq!(table.crs(), Some(ITM));
        assert_eq!(table.value(0, SITE_ID).unwrap(), &Value::from("Mount Stewart"));
        assert_eq!(table.value(0, NEAREST_TRANSIT_NAME).unwrap(), &Value::from("Central Station"));
        assert_eq!(table.value(0, MEDICAL_DISTANCE_KM).unwrap(), &Value::Number(2.0));
        assert!(table.rows()[0].geometry.is_some());
    }
}
