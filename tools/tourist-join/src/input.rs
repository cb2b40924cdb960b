use anyhow::{bail, Context, Result};
use geo::{Coord, Geometry, LineString, MultiPoint, MultiPolygon, Point, Polygon};
use geojson::{FeatureCollection, GeoJson};
use std::path::Path;
use tourist_proximity::{Crs, Row, Table, Value};

/// Read a GeoJSON file into a table, one row per feature.
///
/// Columns are the union of all property keys in order of first appearance.
/// Accepts a FeatureCollection, a single Feature, or a bare Geometry.
pub fn read_geojson_table(path: &Path) -> Result<Table> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read GeoJSON file: {}", path.display()))?;

    let geojson: GeoJson = content
        .parse()
        .with_context(|| format!("Failed to parse GeoJSON from: {}", path.display()))?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        GeoJson::Feature(feature) => FeatureCollection {
            bbox: None,
            features: vec![feature],
            foreign_members: None,
        },
        GeoJson::Geometry(geom) => FeatureCollection {
            bbox: None,
            features: vec![geojson::Feature {
                bbox: None,
                geometry: Some(geom),
                id: None,
                properties: None,
                foreign_members: None,
            }],
            foreign_members: None,
        },
    };

    let crs = declared_crs(&collection)
        .with_context(|| format!("Unsupported crs member in: {}", path.display()))?;

    let mut columns: Vec<String> = Vec::new();
    for feature in &collection.features {
        if let Some(properties) = &feature.properties {
            for key in properties.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
    }

    let mut table = Table::new(columns.clone()).with_crs(crs);

    for (i, feature) in collection.features.into_iter().enumerate() {
        let values = columns
            .iter()
            .map(|column| {
                feature
                    .properties
                    .as_ref()
                    .and_then(|p| p.get(column))
                    .map(json_to_value)
                    .unwrap_or(Value::Null)
            })
            .collect();

        let geometry = match feature.geometry {
            Some(geom) => Some(
                geojson_to_geometry(geom.value)
                    .with_context(|| format!("Feature {} in {}", i, path.display()))?,
            ),
            None => None,
        };

        table.push_row(Row { values, geometry })?;
    }

    log::debug!(
        "Read {} features ({} columns, {}) from {}",
        table.len(),
        table.columns().len(),
        crs,
        path.display()
    );

    Ok(table)
}

/// CRS named by a legacy `crs` member; RFC 7946 data defaults to WGS84.
fn declared_crs(collection: &FeatureCollection) -> Result<Crs> {
    let name = collection
        .foreign_members
        .as_ref()
        .and_then(|m| m.get("crs"))
        .and_then(|crs| crs.pointer("/properties/name"))
        .and_then(|name| name.as_str());

    let Some(name) = name else {
        return Ok(Crs::Wgs84);
    };

    if name.ends_with("CRS84") {
        return Ok(Crs::Wgs84);
    }

    // urn:ogc:def:crs:EPSG::2157 or EPSG:2157
    let code = name.rsplit(':').next().unwrap_or(name);
    Ok(code.parse::<Crs>()?)
}

fn json_to_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
        serde_json::Value::Bool(b) => Value::Text(b.to_string()),
        other => Value::Text(other.to_string()),
    }
}

/// Convert a GeoJSON geometry value to a geo Geometry
pub fn geojson_to_geometry(value: geojson::Value) -> Result<Geometry<f64>> {
    match value {
        geojson::Value::Point(position) => Ok(Geometry::Point(position_to_point(&position)?)),
        geojson::Value::MultiPoint(positions) => {
            let points = positions
                .iter()
                .map(|p| position_to_point(p))
                .collect::<Result<Vec<_>>>()?;
            Ok(Geometry::MultiPoint(MultiPoint::new(points)))
        }
        geojson::Value::LineString(coords) => Ok(Geometry::LineString(coords_to_linestring(&coords)?)),
        geojson::Value::Polygon(rings) => Ok(Geometry::Polygon(rings_to_polygon(&rings)?)),
        geojson::Value::MultiPolygon(polygons) => {
            let polygons = polygons
                .iter()
                .map(|rings| rings_to_polygon(rings))
                .collect::<Result<Vec<_>>>()?;
            Ok(Geometry::MultiPolygon(MultiPolygon::new(polygons)))
        }
        _ => bail!("Unsupported geometry type"),
    }
}

fn rings_to_polygon(rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>> {
    let Some(exterior) = rings.first() else {
        bail!("Polygon has no rings");
    };
    let interiors = rings
        .iter()
        .skip(1)
        .map(|r| coords_to_linestring(r))
        .collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(coords_to_linestring(exterior)?, interiors))
}

/// Convert GeoJSON coordinate array to LineString
fn coords_to_linestring(coords: &[Vec<f64>]) -> Result<LineString<f64>> {
    coords
        .iter()
        .map(|c| position_to_point(c).map(|p| p.0))
        .collect::<Result<Vec<Coord<f64>>>>()
        .map(LineString::new)
}

fn position_to_point(position: &[f64]) -> Result<Point<f64>> {
    match position {
        [x, y, ..] => Ok(Point::new(*x, *y)),
        _ => bail!("Position has fewer than two coordinates"),
    }
}

/// Read a CSV file with a header row. Empty fields become nulls.
pub fn read_csv_table(path: &Path) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(false)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read CSV header: {}", path.display()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut table = Table::new(headers);

    for (i, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Bad CSV record {} in {}", i + 1, path.display()))?;
        let values = record
            .iter()
            .map(|field| {
                let field = field.trim();
                if field.is_empty() {
                    Value::Null
                } else {
                    Value::Text(field.to_string())
                }
            })
            .collect();
        table.push_row(Row::new(values))?;
    }

    log::debug!("Read {} CSV rows from {}", table.len(), path.display());
    Ok(table)
}
