//! Core data types and errors for proximity annotation.

use std::sync::Arc;

use geo::{Geometry, MultiPolygon, Point, Polygon};

use crate::crs::Crs;
use crate::identifiers::*;

// ============================================================================
// Geometry
// ============================================================================

/// Source geometry of a query record.
///
/// Areas resolve from their centroid, points from themselves.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryGeometry {
    Point(Point),
    Polygon(Polygon),
    MultiPolygon(MultiPolygon),
}

impl QueryGeometry {
    pub fn is_area(&self) -> bool {
        !matches!(self, Self::Point(_))
    }

    /// Accepts the geometry kinds a query record can carry.
    pub fn from_geometry(geometry: Geometry) -> Option<Self> {
        match geometry {
            Geometry::Point(p) => Some(Self::Point(p)),
            Geometry::Polygon(p) => Some(Self::Polygon(p)),
            Geometry::MultiPolygon(mp) => Some(Self::MultiPolygon(mp)),
            _ => None,
        }
    }
}

impl From<QueryGeometry> for Geometry {
    fn from(value: QueryGeometry) -> Self {
        match value {
            QueryGeometry::Point(p) => Geometry::Point(p),
            QueryGeometry::Polygon(p) => Geometry::Polygon(p),
            QueryGeometry::MultiPolygon(mp) => Geometry::MultiPolygon(mp),
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A named location in the working (projected) CRS.
#[derive(Clone, Debug, PartialEq)]
pub struct PointEntity {
    pub id: EntityIdentifier,
    pub name: Arc<str>,
    pub location: Point,
}

/// A reference row as it arrives from an external table, before projection.
#[derive(Clone, Debug)]
pub struct RawRecord {
    pub id: EntityIdentifier,
    pub name: Arc<str>,
    pub location: Option<Point>,
}

impl RawRecord {
    pub fn new(id: impl Into<EntityIdentifier>, name: impl AsRef<str>, location: Option<Point>) -> Self {
        Self {
            id: id.into(),
            name: name.as_ref().into(),
            location,
        }
    }
}

/// A site or visit spot to annotate.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryRecord {
    pub id: RecordIdentifier,
    pub name: Arc<str>,
    pub geometry: Option<QueryGeometry>,
}

impl QueryRecord {
    pub fn new(id: impl Into<RecordIdentifier>, name: impl AsRef<str>, geometry: Option<QueryGeometry>) -> Self {
        Self {
            id: id.into(),
            name: name.as_ref().into(),
            geometry,
        }
    }
}

/// Nearest facility of one category, as stored on an annotated record.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NearestFacility {
    pub name: Arc<str>,
    /// Kilometres, rounded to two decimals
    pub distance_km: f64,
}

/// A query record with its nearest transit hub and medical practice.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotatedRecord {
    /// The input record, geometry still in its source CRS
    pub record: QueryRecord,
    /// Point the distances were measured from, in the working CRS
    pub query_location: Point,
    pub transit: NearestFacility,
    pub medical: NearestFacility,
}

// ============================================================================
// Errors
// ============================================================================

/// Why a reference record was rejected during set construction
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RecordDefect {
    #[error("missing location")]
    MissingLocation,

    #[error("non-finite coordinates ({0}, {1})")]
    NonFiniteLocation(f64, f64),

    #[error("projection failed: {0}")]
    Projection(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RejectedRecord {
    pub id: EntityIdentifier,
    pub defect: RecordDefect,
}

#[derive(Debug, thiserror::Error)]
pub enum ProximityError {
    #[error("{} invalid record(s) in reference set `{set}`: {}", .rejected.len(), describe_rejected(.rejected))]
    InvalidRecord {
        set: String,
        rejected: Vec<RejectedRecord>,
    },

    #[error("Reference set `{0}` is empty")]
    EmptyReferenceSet(String),

    #[error("Non-finite query location ({0}, {1})")]
    NonFiniteQuery(f64, f64),

    #[error("Invalid geometry for record {id}: {reason}")]
    InvalidGeometry { id: RecordIdentifier, reason: String },

    #[error(
        "Join on `{left_key}` = `{right_key}` left {unmatched_left} of {total_left} rows unmatched \
         (threshold {threshold}); check key casing"
    )]
    JoinKeyMismatch {
        left_key: String,
        right_key: String,
        unmatched_left: usize,
        total_left: usize,
        threshold: f64,
    },

    #[error("CRS mismatch: expected {expected}, found {found}")]
    CrsMismatch { expected: Crs, found: Crs },

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Row has {found} values but table has {expected} columns")]
    RowWidth { expected: usize, found: usize },
}

fn describe_rejected(rejected: &[RejectedRecord]) -> String {
    rejected
        .iter()
        .map(|r| format!("{} ({})", r.id, r.defect))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, ProximityError>;

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, polygon};

    #[test]
    fn test_query_geometry_from_geometry() {
        let point = QueryGeometry::from_geometry(Geometry::Point(Point::new(1.0, 2.0)));
        assert_eq!(point, Some(QueryGeometry::Point(Point::new(1.0, 2.0))));
        assert!(!point.unwrap().is_area());

        let square = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0)];
        let area = QueryGeometry::from_geometry(Geometry::Polygon(square)).unwrap();
        assert!(area.is_area());

        let line = geo::Line::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 });
        assert_eq!(QueryGeometry::from_geometry(Geometry::Line(line)), None);
    }

    #[test]
    fn test_invalid_record_message_lists_every_record() {
        let err = ProximityError::InvalidRecord {
            set: "transit".into(),
            rejected: vec![
                RejectedRecord {
                    id: EntityIdentifier::new("3"),
                    defect: RecordDefect::MissingLocation,
                },
                RejectedRecord {
                    id: EntityIdentifier::new("9"),
                    defect: RecordDefect::NonFiniteLocation(f64::NAN, 1.0),
                },
            ],
        };

        let message = err.to_string();
        assert!(message.starts_with("2 invalid record(s) in reference set `transit`"));
        assert!(message.contains("3 (missing location)"));
        assert!(message.contains("9 (non-finite coordinates"));
    }
}
