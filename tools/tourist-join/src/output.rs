use anyhow::{Context, Result};
use geo::{MultiPolygon, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tourist_proximity::{Crs, Table};

fn ring_to_positions(ring: &geo::LineString<f64>) -> Vec<Vec<f64>> {
    ring.0.iter().map(|c| vec![c.x, c.y]).collect()
}

/// Convert a geo Polygon to GeoJSON Value
fn polygon_to_geojson(poly: &Polygon<f64>) -> Vec<Vec<Vec<f64>>> {
    let mut rings = vec![ring_to_positions(poly.exterior())];
    rings.extend(poly.interiors().iter().map(ring_to_positions));
    rings
}

fn multipolygon_to_geojson(mp: &MultiPolygon<f64>) -> Value {
    Value::MultiPolygon(mp.0.iter().map(polygon_to_geojson).collect())
}

fn geometry_to_geojson(geometry: &geo::Geometry<f64>) -> Value {
    match geometry {
        geo::Geometry::Point(p) => Value::Point(vec![p.x(), p.y()]),
        geo::Geometry::Polygon(poly) => Value::Polygon(polygon_to_geojson(poly)),
        geo::Geometry::MultiPolygon(mp) => multipolygon_to_geojson(mp),
        other => Value::from(other),
    }
}

fn value_to_json(value: &tourist_proximity::Value) -> serde_json::Value {
    match value {
        tourist_proximity::Value::Null => serde_json::Value::Null,
        tourist_proximity::Value::Text(s) => serde_json::json!(s),
        tourist_proximity::Value::Number(n) => serde_json::json!(n),
    }
}

/// Legacy named-CRS member so readers know the coordinate system.
fn crs_member(crs: Crs) -> JsonObject {
    let mut members = JsonObject::new();
    members.insert(
        "crs".to_string(),
        serde_json::json!({
            "type": "name",
            "properties": { "name": crs.urn() }
        }),
    );
    members
}

/// Build a FeatureCollection with one feature per table row.
pub fn table_to_feature_collection(table: &Table) -> FeatureCollection {
    let features = table
        .rows()
        .iter()
        .map(|row| {
            let properties: JsonObject = table
                .columns()
                .iter()
                .zip(&row.values)
                .map(|(column, value)| (column.clone(), value_to_json(value)))
                .collect();

            Feature {
                bbox: None,
                geometry: row.geometry.as_ref().map(|g| Geometry::new(geometry_to_geojson(g))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(crs_member(table.crs().unwrap_or(Crs::Wgs84))),
    }
}

/// Output files written to temporaries beside their targets and moved into
/// place together by [`StagedOutputs::commit`]. Dropping it uncommitted
/// removes every temporary.
#[derive(Default)]
pub struct StagedOutputs {
    staged: Vec<(NamedTempFile, PathBuf)>,
}

impl StagedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    fn stage(&mut self, output_path: &Path) -> Result<&mut NamedTempFile> {
        let dir = output_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create a temporary file for {}", output_path.display()))?;

        self.staged.push((file, output_path.to_path_buf()));
        let (file, _) = self.staged.last_mut().context("No staged file")?;
        Ok(file)
    }

    /// Stage a table as GeoJSON, declaring the table's CRS
    pub fn geojson(&mut self, table: &Table, output_path: &Path) -> Result<()> {
        log::info!("Writing {} features to {}", table.len(), output_path.display());

        let geojson = GeoJson::from(table_to_feature_collection(table));
        let json_string = serde_json::to_string_pretty(&geojson).context("Failed to serialize GeoJSON")?;

        let file = self.stage(output_path)?;
        file.write_all(json_string.as_bytes())
            .with_context(|| format!("Failed to write GeoJSON to {}", output_path.display()))?;

        Ok(())
    }

    /// Stage a table's attributes (no geometry) as CSV
    pub fn csv(&mut self, table: &Table, output_path: &Path) -> Result<()> {
        log::info!("Writing {} rows to {}", table.len(), output_path.display());

        let file = self.stage(output_path)?;
        let mut writer = csv::Writer::from_writer(file);

        writer.write_record(table.columns())?;
        for row in table.rows() {
            writer.write_record(row.values.iter().map(|v| v.to_string()))?;
        }

        writer
            .flush()
            .with_context(|| format!("Failed to write CSV to {}", output_path.display()))?;

        Ok(())
    }

    /// Move every staged file onto its target path.
    pub fn commit(self) -> Result<()> {
        for (file, output_path) in self.staged {
            file.persist(&output_path)
                .with_context(|| format!("Failed to move output into {}", output_path.display()))?;
        }
        Ok(())
    }
}

/// Write a single table to a GeoJSON file
pub fn write_table_geojson(table: &Table, output_path: &Path) -> Result<()> {
    let mut outputs = StagedOutputs::new();
    outputs.geojson(table, output_path)?;
    outputs.commit()
}
