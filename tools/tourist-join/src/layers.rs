use anyhow::{bail, Context, Result};
use geo::{Geometry, MultiPolygon};
use tourist_proximity::{
    projector, Crs, EntityIdentifier, QueryGeometry, QueryRecord, RawRecord, ReferenceSet, Region, RegionLayer, Row,
    Table,
};

/// Build a projected reference set from a point layer.
///
/// Row order becomes the tie-break order. Rows without a point geometry are
/// handed to the builder with no location so they are reported, not skipped.
/// A layer with no features gives an empty set, which fails at resolution.
pub fn reference_set(label: &str, table: &Table, name_column: &str, working: Crs) -> Result<ReferenceSet> {
    let source = table.crs().unwrap_or(Crs::Wgs84);
    let projector = projector(source, working)?;

    let set = if table.is_empty() {
        ReferenceSet::build(label, Vec::new(), projector.as_ref())?
    } else {
        let name_idx = table
            .column_index(name_column)
            .with_context(|| format!("{label} layer has no name column"))?;

        let records = table.rows().iter().enumerate().map(|(i, row)| {
            let location = match &row.geometry {
                Some(Geometry::Point(p)) => Some(*p),
                _ => None,
            };
            RawRecord::new(EntityIdentifier::from_index(i), row.values[name_idx].to_string(), location)
        });
        ReferenceSet::build(label, records, projector.as_ref())?
    };

    log::info!("Built {} reference set: {} entries ({} -> {})", label, set.len(), source, working);
    Ok(set)
}

/// Query records keyed by `id_column`, geometry left in the table's CRS.
///
/// An empty layer may carry no columns at all and yields no records.
pub fn query_records(table: &Table, id_column: &str) -> Result<Vec<QueryRecord>> {
    if table.is_empty() {
        return Ok(Vec::new());
    }
    let id_idx = table.column_index(id_column)?;

    let records = table
        .rows()
        .iter()
        .map(|row| {
            let id = row.values[id_idx].to_string();
            let geometry = row.geometry.clone().and_then(QueryGeometry::from_geometry);
            QueryRecord::new(id.as_str(), &id, geometry)
        })
        .collect();

    Ok(records)
}

/// Annotations side by side with the source rows they were computed from.
///
/// Rows pair up by position, so repeated or missing ids in `skip_column`
/// cannot cross attributes between features. Source columns that clash with
/// an annotation column get a `_right` suffix; geometry comes from the source.
pub fn attach_attributes(annotations: &Table, source: &Table, skip_column: &str) -> Result<Table> {
    if annotations.len() != source.len() {
        bail!("{} annotations for {} source rows", annotations.len(), source.len());
    }

    let kept: Vec<usize> = (0..source.columns().len())
        .filter(|&i| source.columns()[i] != skip_column)
        .collect();

    let mut columns = annotations.columns().to_vec();
    for &i in &kept {
        let name = &source.columns()[i];
        if annotations.has_column(name) {
            columns.push(format!("{name}_right"));
        } else {
            columns.push(name.clone());
        }
    }

    let mut table = Table::new(columns).with_crs(source.crs().unwrap_or(Crs::Wgs84));
    for (annotated, row) in annotations.rows().iter().zip(source.rows()) {
        let mut values = annotated.values.clone();
        values.extend(kept.iter().map(|&i| row.values[i].clone()));
        table.push_row(Row {
            values,
            geometry: row.geometry.clone(),
        })?;
    }

    Ok(table)
}

/// Region layer named by `name_column`. Every feature must be an area.
pub fn region_layer(table: &Table, name_column: &str) -> Result<RegionLayer> {
    let name_idx = table.column_index(name_column)?;

    let regions = table
        .rows()
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let boundary = match &row.geometry {
                Some(Geometry::Polygon(p)) => MultiPolygon::new(vec![p.clone()]),
                Some(Geometry::MultiPolygon(mp)) => mp.clone(),
                _ => bail!("Region {} ({}) is not a polygon", i, row.values[name_idx]),
            };
            Ok(Region {
                name: row.values[name_idx].to_string(),
                boundary,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RegionLayer::new(table.crs().unwrap_or(Crs::Wgs84), regions))
}
