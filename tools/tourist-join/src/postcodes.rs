use anyhow::{Context, Result};
use geo::Point;
use tourist_proximity::{merge, Crs, MergeOptions, Row, Table};

/// Column names of the two CSV sources.
#[derive(Clone, Debug)]
pub struct PostcodeColumns {
    pub postcode: String,
    pub practice_postcode: String,
    pub latitude: String,
    pub longitude: String,
    /// Only postcodes with this prefix are kept
    pub prefix: String,
}

impl Default for PostcodeColumns {
    fn default() -> Self {
        Self {
            postcode: "postcode".to_string(),
            practice_postcode: "Postcode".to_string(),
            latitude: "latitude".to_string(),
            longitude: "longitude".to_string(),
            prefix: "BT".to_string(),
        }
    }
}

/// Columns removed from the located practice table when present.
pub const DROPPED_COLUMNS: [&str; 4] = ["id", "Postcode", "LCG", "Registered_Patients"];

/// Locate GP practices by joining them to the postcode lookup.
///
/// Returns a WGS84 point table with one row per (postcode, practice) pair
/// whose postcode starts with the configured prefix.
pub fn locate_practices(postcodes: &Table, practices: &Table, columns: &PostcodeColumns) -> Result<Table> {
    let outcome = merge(
        postcodes,
        practices,
        &columns.postcode,
        &columns.practice_postcode,
        &MergeOptions::default(),
    )
    .context("Failed to join practices to postcodes")?;

    log::info!(
        "Matched {} practice rows ({} practices without a known postcode)",
        outcome.table.len(),
        outcome.unmatched_right
    );

    let prefix = columns.prefix.as_str();
    let regional = outcome
        .table
        .filter_by(&columns.postcode, |v| v.as_text().is_some_and(|p| p.starts_with(prefix)))?;

    let trimmed = regional.drop_columns(&DROPPED_COLUMNS);
    let lat_idx = trimmed.column_index(&columns.latitude)?;
    let lon_idx = trimmed.column_index(&columns.longitude)?;
    let code_idx = trimmed.column_index(&columns.postcode)?;

    let mut located = Table::new(trimmed.columns().to_vec()).with_crs(Crs::Wgs84);
    for row in trimmed.into_rows() {
        let lat = row.values[lat_idx].as_number();
        let lon = row.values[lon_idx].as_number();

        let (Some(lat), Some(lon)) = (lat, lon) else {
            anyhow::bail!("Postcode {} has no usable coordinates", row.values[code_idx]);
        };

        let geometry = Point::new(lon, lat).into();
        located.push_row(Row::new(row.values).with_geometry(geometry))?;
    }

    log::info!("Kept {} practices with a {} postcode", located.len(), prefix);
    Ok(located)
}
