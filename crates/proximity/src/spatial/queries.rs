//! Distance helpers for the working (projected) CRS.
//!
//! Every distance goes through [`squared_distance`] so the scan and the
//! R-tree produce bit-identical values.

use geo::Point;

/// Squared Euclidean distance, `dx*dx + dy*dy`
#[inline]
pub fn squared_distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

/// Euclidean distance in CRS units (metres for a projected CRS)
#[inline]
pub fn euclidean_distance(a: Point, b: Point) -> f64 {
    squared_distance([a.x(), a.y()], [b.x(), b.y()]).sqrt()
}

/// Metres to kilometres, rounded to two decimals.
///
/// Conversion happens before rounding. Halves round away from zero
/// (`f64::round`), so 1235 m is 1.24 km and 1125 m is 1.13 km.
pub fn meters_to_km(meters: f64) -> f64 {
    (meters / 1000.0 * 100.0).round() / 100.0
}
