//! Nearest-neighbour resolution against a reference set.
//!
//! The linear scan is the reference behaviour: the first entity (in set
//! order) at the minimum distance wins. The R-tree strategy returns exactly
//! the same entity and distance.

use std::sync::Arc;

use geo::Point;

use crate::identifiers::EntityIdentifier;
use crate::models::types::{ProximityError, Result};
use crate::reference::ReferenceSet;
use crate::spatial::queries::euclidean_distance;

/// Closest reference entity to a query point.
#[derive(Clone, Debug, PartialEq)]
pub struct Nearest {
    pub id: EntityIdentifier,
    pub name: Arc<str>,
    /// Position in the reference set
    pub ordinal: usize,
    /// Metres in the working CRS
    pub distance_m: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResolveStrategy {
    #[default]
    LinearScan,
    RTree,
}

pub trait NearestNeighbor: Send + Sync {
    fn nearest(&self, query: Point, set: &ReferenceSet) -> Result<Nearest>;
}

impl NearestNeighbor for ResolveStrategy {
    fn nearest(&self, query: Point, set: &ReferenceSet) -> Result<Nearest> {
        match self {
            Self::LinearScan => resolve(query, set),
            Self::RTree => resolve_indexed(query, set),
        }
    }
}

/// Linear scan; ties go to the earliest entity.
pub fn resolve(query: Point, set: &ReferenceSet) -> Result<Nearest> {
    check_query(query)?;

    let mut best: Option<(usize, f64)> = None;
    for (ordinal, entity) in set.iter().enumerate() {
        let distance = euclidean_distance(query, entity.location);
        // Strict comparison keeps the first minimum
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((ordinal, distance));
        }
    }

    let (ordinal, distance) = best.ok_or_else(|| ProximityError::EmptyReferenceSet(set.label().to_string()))?;
    Ok(nearest_at(set, ordinal, distance))
}

/// R-tree lookup with the same tie-break as [`resolve`].
pub fn resolve_indexed(query: Point, set: &ReferenceSet) -> Result<Nearest> {
    check_query(query)?;

    let mut candidates = set
        .tree()
        .nearest_neighbor_iter_with_distance_2(&[query.x(), query.y()]);

    let (first, first_d2) = candidates
        .next()
        .ok_or_else(|| ProximityError::EmptyReferenceSet(set.label().to_string()))?;
    let distance = first_d2.sqrt();

    // Equidistant nodes arrive consecutively but in traversal order
    let ordinal = candidates
        .take_while(|(_, d2)| d2.sqrt() == distance)
        .map(|(node, _)| node.ordinal)
        .fold(first.ordinal, usize::min);

    // Recompute from the chosen entity so both strategies share one formula
    let location = set.entities()[ordinal].location;
    Ok(nearest_at(set, ordinal, euclidean_distance(query, location)))
}

fn nearest_at(set: &ReferenceSet, ordinal: usize, distance_m: f64) -> Nearest {
    let entity = &set.entities()[ordinal];
    Nearest {
        id: entity.id.clone(),
        name: entity.name.clone(),
        ordinal,
        distance_m,
    }
}

fn check_query(query: Point) -> Result<()> {
    if query.x().is_finite() && query.y().is_finite() {
        Ok(())
    } else {
        Err(ProximityError::NonFiniteQuery(query.x(), query.y()))
    }
}
