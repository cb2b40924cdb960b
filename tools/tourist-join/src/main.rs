use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tourist_proximity::{
    merge, projector, spatial_join, AnnotateOptions, AnnotatedRecord, AnnotationPipeline, Crs, MergeOptions,
    ReferenceSet, ResolveStrategy, SpatialJoinOptions, SpatialPredicate, Table, NEAREST_MEDICAL_NAME,
};

mod input;
mod layers;
mod output;
mod postcodes;

use input::{read_csv_table, read_geojson_table};
use layers::{attach_attributes, query_records, reference_set, region_layer};
use output::{write_table_geojson, StagedOutputs};
use postcodes::{locate_practices, PostcodeColumns};

#[derive(Parser, Debug)]
#[command(
    name = "tourist-join",
    author,
    version,
    about = "Annotate tourist sites with their nearest transport hub and GP surgery",
    long_about = "Builds reference sets of transport hubs and GP practices, finds the nearest \
                  of each for every tourist site and visit spot, and joins the results with \
                  practice postcodes and county boundaries.\n\n\
                  Distances are measured in a projected CRS (Irish Transverse Mercator by \
                  default). Output geometry stays in the input CRS."
)]
struct Cli {
    /// Verbose output (show debug messages)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Locate GP practices from the UK postcode lookup
    GpPostcodes(GpPostcodesArgs),
    /// Annotate sites (and optionally visit spots) with nearest facilities
    Annotate(AnnotateArgs),
}

#[derive(clap::Args, Debug)]
struct GpPostcodesArgs {
    /// UK postcode CSV (id, postcode, latitude, longitude)
    #[arg(long)]
    postcodes: PathBuf,

    /// GP practice reference CSV
    #[arg(long)]
    practices: PathBuf,

    /// Output GeoJSON file of located practices
    #[arg(short, long)]
    output: PathBuf,

    /// Keep only postcodes starting with this prefix
    #[arg(long, default_value = "BT")]
    prefix: String,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
enum Strategy {
    /// Compare against every reference entity
    #[default]
    Linear,
    /// Walk the R-tree
    Rtree,
}

impl From<Strategy> for ResolveStrategy {
    fn from(value: Strategy) -> Self {
        match value {
            Strategy::Linear => ResolveStrategy::LinearScan,
            Strategy::Rtree => ResolveStrategy::RTree,
        }
    }
}

#[derive(clap::Args, Debug)]
struct AnnotateArgs {
    /// Transport hub point GeoJSON
    #[arg(long)]
    stations: PathBuf,

    /// Located GP practice point GeoJSON (as written by gp-postcodes)
    #[arg(long)]
    gps: PathBuf,

    /// Tourist site polygon GeoJSON
    #[arg(long)]
    sites: PathBuf,

    /// County boundary polygon GeoJSON
    #[arg(long)]
    counties: PathBuf,

    /// Visit spot GeoJSON (points or polygons)
    #[arg(long, requires = "spots_output")]
    spots: Option<PathBuf>,

    /// Output CSV of annotated sites
    #[arg(long)]
    output_csv: PathBuf,

    /// Output GeoJSON of annotated sites
    #[arg(long)]
    output_geojson: PathBuf,

    /// Output GeoJSON of annotated visit spots
    #[arg(long)]
    spots_output: Option<PathBuf>,

    /// CRS distances are measured in
    #[arg(long, default_value = "epsg:2157")]
    working_crs: Crs,

    #[arg(long, value_enum, default_value_t = Strategy::Linear)]
    strategy: Strategy,

    /// Annotate on a single thread
    #[arg(long)]
    sequential: bool,

    /// Fail when more than this fraction of sites lose their practice postcode
    #[arg(long)]
    max_unmatched: Option<f64>,

    /// Require sites to lie within a county instead of intersecting it
    #[arg(long)]
    within: bool,

    #[arg(long, default_value = "Station")]
    station_column: String,

    #[arg(long, default_value = "PracticeName")]
    practice_column: String,

    #[arg(long, default_value = "postcode")]
    postcode_column: String,

    #[arg(long, default_value = "SITE")]
    site_column: String,

    #[arg(long, default_value = "Name")]
    spot_column: String,

    #[arg(long, default_value = "CountyName")]
    county_column: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .format_timestamp(None)
    .init();

    match &cli.command {
        Command::GpPostcodes(args) => run_gp_postcodes(args),
        Command::Annotate(args) => run_annotate(args),
    }
}

fn run_gp_postcodes(args: &GpPostcodesArgs) -> Result<()> {
    log::info!("=== GP Practice Locator ===");

    log::info!("Phase 1: Reading CSV files...");
    let postcodes = read_csv_table(&args.postcodes).context("Failed to read postcode lookup")?;
    let practices = read_csv_table(&args.practices).context("Failed to read GP practices")?;
    log::info!("  {} postcodes, {} practices", postcodes.len(), practices.len());

    log::info!("Phase 2: Joining practices to postcodes...");
    let columns = PostcodeColumns {
        prefix: args.prefix.clone(),
        ..PostcodeColumns::default()
    };
    let located = locate_practices(&postcodes, &practices, &columns)?;

    if located.is_empty() {
        bail!("No practice has a postcode starting with {}", args.prefix);
    }

    log::info!("Phase 3: Writing output...");
    write_table_geojson(&located, &args.output).context("Failed to write practice GeoJSON")?;

    log::info!("Done!");
    Ok(())
}

/// Tables produced by an annotation run, written only once all exist.
#[derive(Debug)]
struct AnnotateOutput {
    sites: Table,
    spots: Option<Table>,
}

fn run_annotate(args: &AnnotateArgs) -> Result<()> {
    log::info!("=== Tourist Site Annotation ===");
    log::info!("Working CRS: {}", args.working_crs);

    let output = annotate_tables(args)?;

    // Phase 5: everything computed, stage every file before any lands
    log::info!("Phase 5: Writing output...");
    let mut staged = StagedOutputs::new();
    staged.csv(&output.sites, &args.output_csv).context("Failed to write site CSV")?;
    staged
        .geojson(&output.sites, &args.output_geojson)
        .context("Failed to write site GeoJSON")?;

    if let (Some(spots), Some(path)) = (&output.spots, &args.spots_output) {
        staged.geojson(spots, path).context("Failed to write spot GeoJSON")?;
    }
    staged.commit()?;

    log::info!("Done!");
    Ok(())
}

fn annotate_tables(args: &AnnotateArgs) -> Result<AnnotateOutput> {
    log::info!("Phase 1: Building reference sets...");
    let stations = read_geojson_table(&args.stations).context("Failed to read stations")?;
    let gps = read_geojson_table(&args.gps).context("Failed to read GP practices")?;

    let transit = reference_set("transit", &stations, &args.station_column, args.working_crs)?;
    let medical = reference_set("medical", &gps, &args.practice_column, args.working_crs)?;

    let options = AnnotateOptions {
        strategy: args.strategy.into(),
        parallel: !args.sequential,
    };

    log::info!("Phase 2: Annotating sites...");
    let sites = read_geojson_table(&args.sites).context("Failed to read tourist sites")?;
    let annotated = annotate_layer(&transit, &medical, &sites, &args.site_column, options)?;
    let site_table = AnnotatedRecord::to_table(&annotated, sites.crs().unwrap_or(Crs::Wgs84))?;

    log::info!("Phase 3: Joining practice postcodes and counties...");
    let practice_postcodes = gps
        .select(&[args.practice_column.as_str(), args.postcode_column.as_str()])?
        .rename(&args.postcode_column, "postal_code")?;

    let merge_options = MergeOptions {
        max_unmatched_fraction: args.max_unmatched,
        ..MergeOptions::default()
    };
    let with_postcodes = merge(
        &site_table,
        &practice_postcodes,
        NEAREST_MEDICAL_NAME,
        &args.practice_column,
        &merge_options,
    )
    .context("Failed to attach practice postcodes")?;
    log::info!(
        "  {} rows with a postcode ({} sites unmatched)",
        with_postcodes.table.len(),
        with_postcodes.unmatched_left
    );

    let counties = read_geojson_table(&args.counties).context("Failed to read counties")?;
    let layer = region_layer(&counties, &args.county_column)?;
    let join_options = SpatialJoinOptions {
        predicate: if args.within {
            SpatialPredicate::Within
        } else {
            SpatialPredicate::Intersects
        },
        ..SpatialJoinOptions::default()
    };
    let with_counties = spatial_join(
        &with_postcodes.table.drop_columns(&[args.practice_column.as_str()]),
        &layer,
        &join_options,
    )
    .context("Failed to attach counties")?;
    log::info!(
        "  {} rows with a county ({} rows outside every county)",
        with_counties.table.len(),
        with_counties.unmatched_left
    );

    let spots = match &args.spots {
        Some(path) => {
            log::info!("Phase 4: Annotating visit spots...");
            let spots = read_geojson_table(path).context("Failed to read visit spots")?;
            let annotated = annotate_layer(&transit, &medical, &spots, &args.spot_column, options)?;
            let spot_table = AnnotatedRecord::to_table(&annotated, spots.crs().unwrap_or(Crs::Wgs84))?;

            // Annotations follow input order, so each spot keeps its own attributes
            let with_attributes = attach_attributes(&spot_table, &spots, &args.spot_column)
                .context("Failed to attach spot attributes")?;
            Some(with_attributes)
        }
        None => {
            log::info!("Phase 4: No visit spots given, skipping");
            None
        }
    };

    Ok(AnnotateOutput {
        sites: with_counties.table,
        spots,
    })
}

/// Annotate every feature of `table`, projecting from the table's CRS.
fn annotate_layer(
    transit: &ReferenceSet,
    medical: &ReferenceSet,
    table: &Table,
    id_column: &str,
    options: AnnotateOptions,
) -> Result<Vec<AnnotatedRecord>> {
    let source = table.crs().unwrap_or(Crs::Wgs84);
    let records = query_records(table, id_column)?;

    let pipeline = AnnotationPipeline::new(transit.clone(), medical.clone())?
        .with_projector(projector(source, transit.crs())?)?
        .with_options(options);

    let annotated = pipeline.annotate(&records)?;
    log::info!("  Annotated {} features", annotated.len());
    Ok(annotated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tourist_proximity::ProximityError;

    fn write(path: &Path, content: &str) {
        std::fs::write(path, content).unwrap();
    }

    fn point_features(column: &str, points: &[(&str, f64, f64)], extra: &str) -> String {
        let features: Vec<String> = points
            .iter()
            .map(|(name, x, y)| {
                format!(
                    r#"{{"type":"Feature","properties":{{"{column}":"{name}"{extra}}},"geometry":{{"type":"Point","coordinates":[{x},{y}]}}}}"#
                )
            })
            .collect();
        format!(r#"{{"type":"FeatureCollection","features":[{}]}}"#, features.join(","))
    }

    fn cli(dir: &Path, with_spots: bool) -> AnnotateArgs {
        let stations = dir.join("stations.geojson");
        let gps = dir.join("gps.geojson");
        let sites = dir.join("sites.geojson");
        let counties = dir.join("counties.geojson");
        let spots = dir.join("spots.geojson");

        write(
            &stations,
            &point_features(
                "Station",
                &[
                    ("BELFAST GREAT VICTORIA STREET", -5.9386, 54.5946),
                    ("DERRY~LONDONDERRY", -7.3100, 54.9966),
                ],
                "",
            ),
        );
        write(
            &gps,
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"PracticeName":"City Surgery","postcode":"BT1 1AA"},
                 "geometry":{"type":"Point","coordinates":[-5.93,54.597]}},
                {"type":"Feature","properties":{"PracticeName":"Coleraine Practice","postcode":"BT52 1AA"},
                 "geometry":{"type":"Point","coordinates":[-6.66,55.13]}}
            ]}"#,
        );
        write(
            &sites,
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"SITE":"Botanic Gardens"},
                 "geometry":{"type":"Polygon","coordinates":[[[-5.94,54.59],[-5.92,54.59],[-5.92,54.60],[-5.94,54.60],[-5.94,54.59]]]}}
            ]}"#,
        );
        write(
            &counties,
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"CountyName":"ANTRIM"},
                 "geometry":{"type":"Polygon","coordinates":[[[-6.5,54.4],[-5.5,54.4],[-5.5,55.3],[-6.5,55.3],[-6.5,54.4]]]}}
            ]}"#,
        );
        write(
            &spots,
            &point_features("Name", &[("Carrick-a-Rede", -6.33, 55.24)], r#","Type":"Bridge""#),
        );

        let mut argv = vec![
            "tourist-join".to_string(),
            "annotate".to_string(),
            format!("--stations={}", stations.display()),
            format!("--gps={}", gps.display()),
            format!("--sites={}", sites.display()),
            format!("--counties={}", counties.display()),
            format!("--output-csv={}", dir.join("out.csv").display()),
            format!("--output-geojson={}", dir.join("out.geojson").display()),
        ];
        if with_spots {
            argv.push(format!("--spots={}", spots.display()));
            argv.push(format!("--spots-output={}", dir.join("spots_out.geojson").display()));
        }

        match Cli::parse_from(argv).command {
            Command::Annotate(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_annotate_sites() {
        let dir = tempfile::tempdir().unwrap();
        let args = cli(dir.path(), false);

        let output = annotate_tables(&args).unwrap();
        let sites = &output.sites;

        assert_eq!(
            sites.columns(),
            [
                "site_id",
                "nearest_transit_name",
                "transit_distance_km",
                "nearest_medical_name",
                "medical_distance_km",
                "postal_code",
                "county_name"
            ]
        );
        assert_eq!(sites.len(), 1);
        assert_eq!(sites.value(0, "nearest_transit_name").unwrap().as_text(), Some("Belfast Great Victoria Street"));
        assert_eq!(sites.value(0, "nearest_medical_name").unwrap().as_text(), Some("City Surgery"));
        assert_eq!(sites.value(0, "postal_code").unwrap().as_text(), Some("BT1 1AA"));
        assert_eq!(sites.value(0, "county_name").unwrap().as_text(), Some("ANTRIM"));
        assert_eq!(sites.crs(), Some(Crs::Wgs84));
        assert!(output.spots.is_none());
    }

    #[test]
    fn test_annotate_spots_keep_their_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let args = cli(dir.path(), true);

        let output = annotate_tables(&args).unwrap();
        let spots = output.spots.unwrap();

        assert_eq!(spots.len(), 1);
        assert_eq!(spots.value(0, "site_id").unwrap().as_text(), Some("Carrick-a-Rede"));
        assert_eq!(spots.value(0, "nearest_transit_name").unwrap().as_text(), Some("Derry~Londonderry"));
        assert_eq!(spots.value(0, "nearest_medical_name").unwrap().as_text(), Some("Coleraine Practice"));
        assert_eq!(spots.value(0, "Type").unwrap().as_text(), Some("Bridge"));
        assert!(!spots.has_column("Name"));
    }

    #[test]
    fn test_spots_sharing_a_name_stay_separate() {
        let dir = tempfile::tempdir().unwrap();
        let args = cli(dir.path(), true);
        write(
            &dir.path().join("spots.geojson"),
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"Name":"Car Park","Website":"a"},
                 "geometry":{"type":"Point","coordinates":[-6.33,55.24]}},
                {"type":"Feature","properties":{"Name":"Car Park","Website":"b"},
                 "geometry":{"type":"Point","coordinates":[-5.93,54.59]}},
                {"type":"Feature","properties":{"Name":null,"Website":"c"},
                 "geometry":{"type":"Point","coordinates":[-7.31,54.99]}}
            ]}"#,
        );

        let spots = annotate_tables(&args).unwrap().spots.unwrap();

        assert_eq!(spots.len(), 3);
        let websites: Vec<Option<&str>> = (0..3).map(|i| spots.value(i, "Website").unwrap().as_text()).collect();
        assert_eq!(websites, [Some("a"), Some("b"), Some("c")]);
        assert_eq!(spots.value(0, "nearest_medical_name").unwrap().as_text(), Some("Coleraine Practice"));
        assert_eq!(spots.value(1, "nearest_medical_name").unwrap().as_text(), Some("City Surgery"));
        assert_eq!(spots.value(2, "nearest_transit_name").unwrap().as_text(), Some("Derry~Londonderry"));
        assert_eq!(spots.rows()[1].geometry, Some(geo::Point::new(-5.93, 54.59).into()));
    }

    #[test]
    fn test_empty_sites_give_an_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let args = cli(dir.path(), false);
        write(&dir.path().join("sites.geojson"), r#"{"type":"FeatureCollection","features":[]}"#);

        let sites = annotate_tables(&args).unwrap().sites;
        assert!(sites.is_empty());
        assert!(sites.has_column("site_id"));
        assert!(sites.has_column("county_name"));
    }

    #[test]
    fn test_empty_stations_are_an_empty_reference_set() {
        let dir = tempfile::tempdir().unwrap();
        let args = cli(dir.path(), false);
        write(&dir.path().join("stations.geojson"), r#"{"type":"FeatureCollection","features":[]}"#);

        let err = annotate_tables(&args).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProximityError>(),
            Some(ProximityError::EmptyReferenceSet(label)) if label == "transit"
        ));
    }

    #[test]
    fn test_run_writes_nothing_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = cli(dir.path(), false);
        args.site_column = "NOT_A_COLUMN".to_string();

        assert!(run_annotate(&args).is_err());
        assert!(!dir.path().join("out.csv").exists());
        assert!(!dir.path().join("out.geojson").exists());
    }

    #[test]
    fn test_run_writes_nothing_when_last_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = cli(dir.path(), true);
        args.spots_output = Some(dir.path().join("missing").join("spots_out.geojson"));

        assert!(run_annotate(&args).is_err());
        assert!(!dir.path().join("out.csv").exists());
        assert!(!dir.path().join("out.geojson").exists());
    }

    #[test]
    fn test_run_writes_outputs_in_source_crs() {
        let dir = tempfile::tempdir().unwrap();
        let args = cli(dir.path(), true);

        run_annotate(&args).unwrap();

        let sites = read_geojson_table(&dir.path().join("out.geojson")).unwrap();
        let input = read_geojson_table(&dir.path().join("sites.geojson")).unwrap();
        assert_eq!(sites.crs(), input.crs());
        assert_eq!(sites.rows()[0].geometry, input.rows()[0].geometry);

        let csv = read_csv_table(&dir.path().join("out.csv")).unwrap();
        assert_eq!(csv.value(0, "site_id").unwrap().as_text(), Some("Botanic Gardens"));
        assert!(dir.path().join("spots_out.geojson").exists());
    }
}
