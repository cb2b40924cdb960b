//! Immutable reference sets of named facilities.
//!
//! A set is built once per run from raw records, projected into the working
//! CRS, and only read afterwards. It is cheap to clone since all data is
//! stored in `Arc`s.

use std::collections::HashMap;
use std::sync::Arc;

use geo::Point;
use rstar::RTree;

use crate::crs::{Crs, Projector};
use crate::identifiers::EntityIdentifier;
use crate::models::types::*;
use crate::spatial::index::ReferenceNode;

#[derive(Clone)]
pub struct ReferenceSet {
    label: Arc<str>,
    crs: Crs,

    // Insertion order is the tie-break order
    entities: Arc<[PointEntity]>,

    // Lookup by id (first occurrence wins)
    id_map: Arc<HashMap<EntityIdentifier, usize>>,

    // Spatial index over the same entities
    tree: Arc<RTree<ReferenceNode>>,
}

impl ReferenceSet {
    /// Validates and projects every record into `projector.target()`.
    ///
    /// Fails with [`ProximityError::InvalidRecord`] listing every record that
    /// has no location, a non-finite location, or cannot be projected. No
    /// record is dropped silently.
    pub fn build(
        label: impl AsRef<str>,
        records: impl IntoIterator<Item = RawRecord>,
        projector: &dyn Projector,
    ) -> Result<Self> {
        let label = label.as_ref();
        let target = projector.target();
        target.ensure_projected()?;

        let mut entities = Vec::new();
        let mut rejected = Vec::new();

        for record in records {
            match project_record(&record, projector) {
                Ok(location) => entities.push(PointEntity {
                    id: record.id,
                    name: record.name,
                    location,
                }),
                Err(defect) => rejected.push(RejectedRecord {
                    id: record.id,
                    defect,
                }),
            }
        }

        if !rejected.is_empty() {
            tracing::warn!(
                set = label,
                rejected = rejected.len(),
                "reference records without a usable location"
            );
            return Err(ProximityError::InvalidRecord {
                set: label.to_string(),
                rejected,
            });
        }

        tracing::debug!(set = label, entities = entities.len(), crs = %target, "built reference set");

        Ok(Self::from_entities(label, target, entities))
    }

    /// Wraps entities that are already in `crs` and known to be finite.
    pub(crate) fn from_entities(label: impl AsRef<str>, crs: Crs, entities: Vec<PointEntity>) -> Self {
        debug_assert!(
            entities.iter().all(|e| e.location.x().is_finite() && e.location.y().is_finite()),
            "reference entities must have finite coordinates"
        );

        let mut id_map = HashMap::with_capacity(entities.len());
        for (ordinal, entity) in entities.iter().enumerate() {
            id_map.entry(entity.id.clone()).or_insert(ordinal);
        }

        let tree = RTree::bulk_load(
            entities
                .iter()
                .enumerate()
                .map(|(ordinal, e)| ReferenceNode::new(e.location, ordinal))
                .collect(),
        );

        Self {
            label: label.as_ref().into(),
            crs,
            entities: entities.into(),
            id_map: Arc::new(id_map),
            tree: Arc::new(tree),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &PointEntity> {
        self.entities.iter()
    }

    pub fn entity(&self, ordinal: usize) -> Option<&PointEntity> {
        self.entities.get(ordinal)
    }

    pub fn get(&self, id: &EntityIdentifier) -> Option<&PointEntity> {
        self.id_map.get(id).map(|&ordinal| &self.entities[ordinal])
    }

    pub(crate) fn entities(&self) -> &[PointEntity] {
        &self.entities
    }

    pub(crate) fn tree(&self) -> &RTree<ReferenceNode> {
        &self.tree
    }
}

fn project_record(record: &RawRecord, projector: &dyn Projector) -> std::result::Result<Point, RecordDefect> {
    let location = record.location.ok_or(RecordDefect::MissingLocation)?;
    if !location.x().is_finite() || !location.y().is_finite() {
        return Err(RecordDefect::NonFiniteLocation(location.x(), location.y()));
    }

    let projected = projector
        .project(location)
        .map_err(|e| RecordDefect::Projection(e.to_string()))?;

    if !projected.x().is_finite() || !projected.y().is_finite() {
        return Err(RecordDefect::NonFiniteLocation(projected.x(), projected.y()));
    }

    Ok(projected)
}
