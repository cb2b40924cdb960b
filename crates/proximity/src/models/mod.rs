//! Record types, attribute tables and errors.

pub mod table;
pub mod types;

// Re-exports for convenience
pub use table::{Row, Table, Value};
pub use types::{
    AnnotatedRecord, NearestFacility, PointEntity, ProximityError, QueryGeometry, QueryRecord, RawRecord,
    RecordDefect, RejectedRecord, Result,
};
