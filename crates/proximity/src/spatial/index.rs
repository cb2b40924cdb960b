//! R-tree nodes for reference point lookup.
//!
//! Each node remembers the insertion ordinal of its entity. The R-tree hands
//! back equidistant nodes in traversal order, so ties are settled on the
//! ordinal to stay identical to a linear scan.

use geo::Point;
use rstar::{PointDistance, RTreeObject, AABB};

use super::queries::squared_distance;

#[derive(Clone, Debug)]
pub struct ReferenceNode {
    /// Position of the entity in its reference set
    pub ordinal: usize,
    point: [f64; 2],
}

impl ReferenceNode {
    pub fn new(location: Point, ordinal: usize) -> Self {
        Self {
            ordinal,
            point: [location.x(), location.y()],
        }
    }
}

impl RTreeObject for ReferenceNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

impl PointDistance for ReferenceNode {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        squared_distance(self.point, *point)
    }
}
