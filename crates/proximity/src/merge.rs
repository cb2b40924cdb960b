//! Key-equality and spatial joins over [`Table`]s.
//!
//! Both joins are inner joins: rows without a partner are dropped, and the
//! drop counts come back in the [`MergeOutcome`] so a silently shrinking
//! dataset shows up in the logs.

use std::collections::HashMap;

use geo::{Geometry, MultiPolygon, Relate};

use crate::crs::Crs;
use crate::models::table::{Row, Table, Value};
use crate::models::types::{ProximityError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JoinMode {
    /// Keep only rows whose key exists on both sides
    #[default]
    Inner,
}

#[derive(Clone, Debug)]
pub struct MergeOptions {
    pub mode: JoinMode,
    /// Fail with `JoinKeyMismatch` when more than this fraction of the left
    /// rows find no partner.
    pub max_unmatched_fraction: Option<f64>,
    /// Appended to right-hand column names that clash with left ones
    pub suffix: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            mode: JoinMode::Inner,
            max_unmatched_fraction: None,
            suffix: "_right".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MergeOutcome {
    pub table: Table,
    /// Left rows dropped for lack of a partner
    pub unmatched_left: usize,
    /// Right rows (or regions) that matched nothing
    pub unmatched_right: usize,
}

/// Inner equality join of `left.left_key` against `right.right_key`.
///
/// Keys compare as exact, case-sensitive text. Output rows follow left order,
/// with one row per matching right row (in right order). Columns are all left
/// columns, then the right columns minus the right key when both keys share a
/// name. Left geometry is kept.
pub fn merge(
    left: &Table,
    right: &Table,
    left_key: &str,
    right_key: &str,
    options: &MergeOptions,
) -> Result<MergeOutcome> {
    match options.mode {
        JoinMode::Inner => {}
    }

    let left_idx = left.column_index(left_key)?;
    let right_idx = right.column_index(right_key)?;

    let mut right_rows_by_key: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, row) in right.rows().iter().enumerate() {
        if let Some(key) = row.values[right_idx].as_key() {
            right_rows_by_key.entry(key.into_owned()).or_default().push(i);
        }
    }

    let skip_right_key = left_key == right_key;
    let right_columns: Vec<usize> = (0..right.columns().len())
        .filter(|&i| !(skip_right_key && i == right_idx))
        .collect();

    let mut table = Table::new(joined_columns(
        left.columns(),
        right_columns.iter().map(|&i| right.columns()[i].as_str()),
        &options.suffix,
    ));
    if let Some(crs) = left.crs() {
        table = table.with_crs(crs);
    }

    let mut right_matched = vec![false; right.len()];
    let mut unmatched_left = 0;

    for row in left.rows() {
        let partners = row.values[left_idx]
            .as_key()
            .and_then(|key| right_rows_by_key.get(key.as_ref()));

        let Some(partners) = partners else {
            unmatched_left += 1;
            continue;
        };

        for &r in partners {
            right_matched[r] = true;
            let right_row = &right.rows()[r];

            let mut values = row.values.clone();
            values.extend(right_columns.iter().map(|&i| right_row.values[i].clone()));
            table.push_row(Row {
                values,
                geometry: row.geometry.clone(),
            })?;
        }
    }

    let unmatched_right = right_matched.iter().filter(|m| !**m).count();

    report_unmatched(left_key, right_key, left.len(), unmatched_left, unmatched_right);

    if let Some(threshold) = options.max_unmatched_fraction {
        if !left.is_empty() && unmatched_left as f64 / left.len() as f64 > threshold {
            return Err(ProximityError::JoinKeyMismatch {
                left_key: left_key.to_string(),
                right_key: right_key.to_string(),
                unmatched_left,
                total_left: left.len(),
                threshold,
            });
        }
    }

    Ok(MergeOutcome {
        table,
        unmatched_left,
        unmatched_right,
    })
}

// ============================================================================
// Spatial join
// ============================================================================

/// A named area, e.g. a county boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub name: String,
    pub boundary: MultiPolygon,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RegionLayer {
    pub crs: Crs,
    pub regions: Vec<Region>,
}

impl RegionLayer {
    pub fn new(crs: Crs, regions: Vec<Region>) -> Self {
        Self { crs, regions }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpatialPredicate {
    /// Row geometry touches or overlaps the region
    #[default]
    Intersects,
    /// Row geometry lies entirely inside the region
    Within,
}

impl SpatialPredicate {
    fn test(&self, geometry: &Geometry, region: &Geometry) -> bool {
        let matrix = geometry.relate(region);
        match self {
            Self::Intersects => matrix.is_intersects(),
            Self::Within => matrix.is_within(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SpatialJoinOptions {
    pub predicate: SpatialPredicate,
    /// Name of the column receiving the region name
    pub column: String,
}

impl Default for SpatialJoinOptions {
    fn default() -> Self {
        Self {
            predicate: SpatialPredicate::Intersects,
            column: "county_name".to_string(),
        }
    }
}

/// Attaches the name of every region each row's geometry satisfies the
/// predicate with. One output row per (row, region) pair, in row then region
/// order; rows without geometry or without a region are dropped.
pub fn spatial_join(table: &Table, layer: &RegionLayer, options: &SpatialJoinOptions) -> Result<MergeOutcome> {
    if let Some(crs) = table.crs() {
        if crs != layer.crs {
            return Err(ProximityError::CrsMismatch {
                expected: crs,
                found: layer.crs,
            });
        }
    }

    let mut out = Table::new(joined_columns(
        table.columns(),
        std::iter::once(options.column.as_str()),
        "_right",
    ))
    .with_crs(layer.crs);

    let boundaries: Vec<Geometry> = layer
        .regions
        .iter()
        .map(|r| Geometry::MultiPolygon(r.boundary.clone()))
        .collect();
    let mut region_matched = vec![false; layer.regions.len()];
    let mut unmatched_left = 0;

    for row in table.rows() {
        let mut matched = false;

        if let Some(geometry) = &row.geometry {
            for (i, region) in layer.regions.iter().enumerate() {
                if !options.predicate.test(geometry, &boundaries[i]) {
                    continue;
                }

                matched = true;
                region_matched[i] = true;

                let mut values = row.values.clone();
                values.push(Value::from(region.name.as_str()));
                out.push_row(Row {
                    values,
                    geometry: row.geometry.clone(),
                })?;
            }
        }

        if !matched {
            unmatched_left += 1;
        }
    }

    let unmatched_right = region_matched.iter().filter(|m| !**m).count();
    report_unmatched("geometry", &options.column, table.len(), unmatched_left, unmatched_right);

    Ok(MergeOutcome {
        table: out,
        unmatched_left,
        unmatched_right,
    })
}

fn joined_columns<'a>(left: &[String], right: impl Iterator<Item = &'a str>, suffix: &str) -> Vec<String> {
    let mut columns = left.to_vec();
    for name in right {
        let mut candidate = name.to_string();
        while columns.contains(&candidate) {
            candidate.push_str(suffix);
        }
        columns.push(candidate);
    }
    columns
}

fn report_unmatched(left_key: &str, right_key: &str, total_left: usize, unmatched_left: usize, unmatched_right: usize) {
    if unmatched_left > 0 || unmatched_right > 0 {
        tracing::warn!(
            left_key,
            right_key,
            total_left,
            unmatched_left,
            unmatched_right,
            "join dropped unmatched rows"
        );
    } else {
        tracing::debug!(left_key, right_key, total_left, "join matched every row");
    }
}
