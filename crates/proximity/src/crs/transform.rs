//! EPSG-to-EPSG transformations through PROJ.
//!
//! A `Proj` object must stay on the thread that created it, so each thread
//! keeps its own, created on first use for a given (source, target) pair.

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use geo::Point;
use proj::Proj;

use super::{Crs, Projector};
use crate::models::types::{ProximityError, Result};

thread_local! {
    static TRANSFORMS: RefCell<HashMap<(Crs, Crs), Proj>> = RefCell::new(HashMap::new());
}

/// Transformation between two EPSG systems, e.g. WGS84 into ITM.
///
/// Geographic coordinates are taken and returned as (longitude, latitude).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProjTransform {
    source: Crs,
    target: Crs,
}

impl ProjTransform {
    /// Fails when PROJ knows no operation between the two systems.
    pub fn new(source: Crs, target: Crs) -> Result<Self> {
        let transform = Self { source, target };
        transform.with_proj(|_| Ok(()))?;
        Ok(transform)
    }

    fn with_proj<T>(&self, f: impl FnOnce(&Proj) -> Result<T>) -> Result<T> {
        TRANSFORMS.with(|cache| {
            let mut cache = cache.borrow_mut();
            let proj = match cache.entry((self.source, self.target)) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(create(self.source, self.target)?),
            };
            f(proj)
        })
    }
}

fn create(source: Crs, target: Crs) -> Result<Proj> {
    Proj::new_known_crs(&source.to_string(), &target.to_string(), None)
        .map_err(|e| ProximityError::Projection(format!("No transformation from {source} to {target}: {e}")))
}

impl Projector for ProjTransform {
    fn source(&self) -> Crs {
        self.source
    }

    fn target(&self) -> Crs {
        self.target
    }

    fn project(&self, point: Point) -> Result<Point> {
        if !point.x().is_finite() || !point.y().is_finite() {
            return Err(ProximityError::Projection(format!(
                "non-finite input ({}, {})",
                point.x(),
                point.y()
            )));
        }

        let (x, y) = self.with_proj(|proj| {
            proj.convert((point.x(), point.y())).map_err(|e| {
                ProximityError::Projection(format!(
                    "({}, {}) from {} to {}: {e}",
                    point.x(),
                    point.y(),
                    self.source,
                    self.target
                ))
            })
        })?;

        if !x.is_finite() || !y.is_finite() {
            return Err(ProximityError::Projection(format!(
                "({}, {}) is outside the {} projection domain",
                point.x(),
                point.y(),
                self.target
            )));
        }

        Ok(Point::new(x, y))
    }
}
