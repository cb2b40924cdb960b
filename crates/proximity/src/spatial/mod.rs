//! Spatial indexing and distance utilities.

pub mod index;
pub mod queries;

pub use queries::{euclidean_distance, meters_to_km};
