use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::features::{FeatureCollection, FieldType, GeometryKind};
use crate::io;
use crate::project::{self, ProjectParams, ZoneParams};
use crate::raster::GridRaster;
use crate::workspace::Workspace;
use crate::zonal::{self, ZonalStatsParams};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Project points onto their nearest river-mile reference points and
    /// sample a DEM at each point
    Project(ProjectArgs),
    /// Compute MIN/MAX/MEAN raster statistics per zone onto zone centroid
    /// points
    ZonalStats(ZonalStatsArgs),
}

#[derive(Args)]
pub struct ProjectArgs {
    /// Point collection with the points to be projected (GeoJSON)
    #[arg(long)]
    pub points: PathBuf,

    /// Point collection carrying the river-mile values (GeoJSON)
    #[arg(long)]
    pub reference: PathBuf,

    /// Numeric field on the reference collection to join across the match
    #[arg(long)]
    pub distance_field: String,

    /// Polygon collection with processing zones (GeoJSON)
    #[arg(long, requires = "zone_field")]
    pub zones: Option<PathBuf>,

    /// Zone name field, required when --zones is given
    #[arg(long, requires = "zones")]
    pub zone_field: Option<String>,

    /// Output feature collection (GeoJSON)
    #[arg(short, long)]
    pub output: PathBuf,

    /// Elevation raster (ESRI ASCII grid)
    #[arg(long)]
    pub dem: PathBuf,

    /// Name of the sampled elevation field on the output
    #[arg(long, default_value = "ELEVATION")]
    pub elevation_field: String,

    /// Remove output points that got no distance value
    #[arg(long)]
    pub remove_nulls: bool,

    /// Also write projection lines (point to match location) to this path
    #[arg(long)]
    pub lines: Option<PathBuf>,
}

#[derive(Args)]
pub struct ZonalStatsArgs {
    /// Polygon collection with zones (GeoJSON)
    #[arg(long)]
    pub zones: PathBuf,

    /// Zone name field
    #[arg(long)]
    pub zone_field: String,

    /// Raster to aggregate (ESRI ASCII grid)
    #[arg(long)]
    pub dem: PathBuf,

    /// Output feature collection (GeoJSON)
    #[arg(short, long)]
    pub output: PathBuf,
}

pub fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Project(args) => run_project(args),
        Command::ZonalStats(args) => run_zonal_stats(args),
    }
}

fn load_points(path: &Path, role: &str) -> Result<FeatureCollection> {
    let fc = io::read_feature_collection(path, role)?;
    if fc.kind != GeometryKind::Point {
        bail!(
            "CLI: {} collection {:?} is {}-typed, expected points",
            role,
            path,
            fc.kind.label()
        );
    }
    Ok(fc)
}

fn load_zones(path: &Path) -> Result<FeatureCollection> {
    let fc = io::read_feature_collection(path, "zones")?;
    if fc.kind != GeometryKind::Polygon {
        bail!(
            "CLI: zones collection {:?} is {}-typed, expected polygons",
            path,
            fc.kind.label()
        );
    }
    Ok(fc)
}

fn check_distance_field(reference: &FeatureCollection, field: &str) -> Result<()> {
    match reference.schema.field_type(field) {
        Some(t) if t.is_numeric() => Ok(()),
        Some(t) => bail!(
            "CLI: --distance-field '{}' is {}-typed on the reference collection; a numeric field is required",
            field,
            t.label()
        ),
        // An empty reference collection carries no schema to check against;
        // the pipeline nulls the field throughout in that case.
        None if reference.is_empty() => Ok(()),
        None => bail!(
            "CLI: --distance-field '{}' does not exist on the reference collection",
            field
        ),
    }
}

fn check_zone_field(collection: &FeatureCollection, field: &str, role: &str) -> Result<()> {
    match collection.schema.field_type(field) {
        Some(FieldType::Text) | Some(FieldType::Integer) => Ok(()),
        Some(t) => bail!(
            "CLI: --zone-field '{}' is {}-typed on the {} collection; text or integer is required",
            field,
            t.label(),
            role
        ),
        None if collection.is_empty() => Ok(()),
        None => bail!(
            "CLI: --zone-field '{}' does not exist on the {} collection",
            field,
            role
        ),
    }
}

fn run_project(args: &ProjectArgs) -> Result<()> {
    let points = load_points(&args.points, "points")?;
    let reference = load_points(&args.reference, "reference")?;
    check_distance_field(&reference, &args.distance_field)?;

    let zones = match (&args.zones, &args.zone_field) {
        (Some(zones_path), Some(zone_field)) => {
            let zones = load_zones(zones_path)?;
            check_zone_field(&zones, zone_field, "zones")?;
            Some(ZoneParams {
                zones,
                zone_field: zone_field.clone(),
            })
        }
        // clap's `requires` rules keep these two flags in lockstep.
        _ => None,
    };

    let raster = GridRaster::from_ascii_file(&args.dem)?;

    tracing::info!(
        "Projecting {} points onto {} reference points{}",
        points.len(),
        reference.len(),
        if zones.is_some() { " (zoned)" } else { "" }
    );

    let mut workspace = Workspace::new();
    let summary = project::run(
        &mut workspace,
        ProjectParams {
            points,
            reference,
            distance_field: args.distance_field.clone(),
            zones,
            raster,
            elevation_field: args.elevation_field.clone(),
            output_path: args.output.clone(),
            remove_nulls: args.remove_nulls,
            lines_path: args.lines.clone(),
        },
    )
    .context("Project: run failed")?;

    tracing::info!(
        "Wrote {} output rows across {} pass(es) to {:?}",
        summary.output_rows,
        summary.zones_processed,
        args.output
    );
    if summary.lines_written > 0 {
        tracing::info!("Wrote {} projection lines", summary.lines_written);
    }
    Ok(())
}

fn run_zonal_stats(args: &ZonalStatsArgs) -> Result<()> {
    let zones = load_zones(&args.zones)?;
    check_zone_field(&zones, &args.zone_field, "zones")?;
    let raster = GridRaster::from_ascii_file(&args.dem)?;

    tracing::info!(
        "Aggregating raster statistics over {} zone polygons",
        zones.len()
    );

    let rows = zonal::run(ZonalStatsParams {
        zones,
        zone_field: args.zone_field.clone(),
        raster,
        output_path: args.output.clone(),
    })
    .context("ZonalStats: run failed")?;

    tracing::info!("Wrote {} zone points to {:?}", rows, args.output);
    Ok(())
}
