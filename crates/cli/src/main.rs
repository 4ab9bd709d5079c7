//! hydroshed CLI - watershed delineation over tiered flow-direction rasters

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

use hydroshed_core::io::GeoTiffSource;
use hydroshed_core::{Crs, RasterSource};
use hydroshed_engine::{DelineateOptions, DelineationResult, Delineator, Tier, TierSet};
use serde_json::{json, Value};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "hydroshed")]
#[command(author, version, about = "Watershed delineation from flow-direction rasters", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Delineate the watershed draining through one point
    Delineate {
        /// Tier configuration (JSON array of tiers, finest first)
        #[arg(short, long)]
        config: PathBuf,
        /// Point X (longitude for geographic CRS)
        #[arg(short)]
        x: f64,
        /// Point Y (latitude for geographic CRS)
        #[arg(short)]
        y: f64,
        /// CRS of the input point
        #[arg(long, default_value = "EPSG:4326")]
        crs: String,
        /// CRS of the output polygon
        #[arg(long, default_value = "EPSG:4326")]
        output_crs: String,
        /// Douglas-Peucker simplification tolerance in output CRS units
        #[arg(long, default_value = "0.0")]
        simplify: f64,
        /// Maximum watershed size in cells
        #[arg(long, default_value = "50000000")]
        max_cells: usize,
        /// Output GeoJSON file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delineate a watershed for every point in a GeoJSON file
    Batch {
        /// Tier configuration (JSON array of tiers, finest first)
        #[arg(short, long)]
        config: PathBuf,
        /// Input GeoJSON FeatureCollection of points
        input: PathBuf,
        /// Output GeoJSON file
        output: PathBuf,
        /// CRS of the input points
        #[arg(long, default_value = "EPSG:4326")]
        crs: String,
        /// CRS of the output polygons
        #[arg(long, default_value = "EPSG:4326")]
        output_crs: String,
        /// Douglas-Peucker simplification tolerance in output CRS units
        #[arg(long, default_value = "0.0")]
        simplify: f64,
        /// Maximum watershed size in cells
        #[arg(long, default_value = "50000000")]
        max_cells: usize,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

const CACHE_BLOCKS: usize = 512;

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn load_tiers(path: &PathBuf) -> Result<TierSet> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open tier configuration {}", path.display()))?;
    let tiers: Vec<Tier> =
        serde_json::from_reader(BufReader::new(file)).context("Invalid tier configuration")?;
    TierSet::new(tiers).context("Inconsistent tier configuration")
}

fn build_delineator(
    config: &PathBuf,
    output_crs: &str,
    simplify: f64,
    max_cells: usize,
) -> Result<Delineator> {
    let tiers = load_tiers(config)?;
    let opts = DelineateOptions {
        output_crs: Crs::parse(output_crs).context("Invalid output CRS")?,
        simplify_tolerance: simplify,
        max_cells,
        ..DelineateOptions::default()
    };
    let source = Arc::new(GeoTiffSource::new(CACHE_BLOCKS));
    let pb = spinner("Opening tier rasters...");
    let delineator =
        Delineator::new(source, tiers, opts).context("Failed to open tier rasters")?;
    pb.finish_and_clear();
    Ok(delineator)
}

fn polygon_coordinates(result: &DelineationResult) -> Value {
    let ring = |line: &geo_types::LineString<f64>| -> Value {
        Value::Array(
            line.coords()
                .map(|c| json!([c.x, c.y]))
                .collect(),
        )
    };

    Value::Array(
        result
            .polygon
            .0
            .iter()
            .map(|polygon| {
                let mut rings = vec![ring(polygon.exterior())];
                rings.extend(polygon.interiors().iter().map(ring));
                Value::Array(rings)
            })
            .collect(),
    )
}

fn feature(result: &DelineationResult, properties: Value) -> Value {
    let mut props = properties;
    let extra = json!({
        "snap_x": result.outlet_x,
        "snap_y": result.outlet_y,
        "area_m2": result.area_m2,
        "cell_count": result.cell_count,
        "tier": result.tier,
        "resolution": result.resolution,
    });
    if let (Some(map), Some(extra)) = (props.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            map.insert(k.clone(), v.clone());
        }
    }
    json!({
        "type": "Feature",
        "geometry": {
            "type": "MultiPolygon",
            "coordinates": polygon_coordinates(result),
        },
        "properties": props,
    })
}

fn write_json(value: &Value, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, value)?;
            writer.flush()?;
        }
        None => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

/// Pull `(x, y, properties)` out of every point feature in a GeoJSON
/// FeatureCollection, rejecting non-point geometries.
fn read_points(path: &PathBuf) -> Result<Vec<(f64, f64, Value)>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let doc: Value = serde_json::from_reader(BufReader::new(file)).context("Invalid GeoJSON")?;

    let features = doc
        .get("features")
        .and_then(Value::as_array)
        .context("Input is not a GeoJSON FeatureCollection")?;

    let mut points = Vec::with_capacity(features.len());
    for (i, feature) in features.iter().enumerate() {
        let geometry = feature.get("geometry").context("Feature has no geometry")?;
        let kind = geometry.get("type").and_then(Value::as_str).unwrap_or("");
        if kind != "Point" {
            anyhow::bail!("Feature {} has geometry '{}'; only Point is supported", i, kind);
        }
        let coords = geometry
            .get("coordinates")
            .and_then(Value::as_array)
            .filter(|c| c.len() >= 2)
            .with_context(|| format!("Feature {} has malformed coordinates", i))?;
        let x = coords[0].as_f64().context("Non-numeric X coordinate")?;
        let y = coords[1].as_f64().context("Non-numeric Y coordinate")?;
        let properties = feature
            .get("properties")
            .cloned()
            .unwrap_or_else(|| json!({}));
        points.push((x, y, properties));
    }
    Ok(points)
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let source = GeoTiffSource::new(CACHE_BLOCKS);
            let handle = source
                .open(input.to_str().context("Non-UTF-8 path")?)
                .context("Failed to open raster")?;
            let (min_x, min_y, max_x, max_y) = handle.transform.bounds(handle.rows, handle.cols);

            println!("File: {}", input.display());
            println!(
                "Dimensions: {} x {} ({} cells)",
                handle.cols,
                handle.rows,
                handle.rows * handle.cols
            );
            println!(
                "Cell size: {} x {}",
                handle.transform.cell_width, handle.transform.cell_height
            );
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                min_x, min_y, max_x, max_y
            );
            println!("CRS: {}", handle.crs);
            println!("NoData: {}", handle.nodata);
        }

        // ── Delineate ────────────────────────────────────────────────
        Commands::Delineate {
            config,
            x,
            y,
            crs,
            output_crs,
            simplify,
            max_cells,
            output,
        } => {
            let delineator = build_delineator(&config, &output_crs, simplify, max_cells)?;
            let input_crs = Crs::parse(&crs).context("Invalid input CRS")?;

            let start = Instant::now();
            let result = delineator
                .delineate(x, y, &input_crs)
                .context("Delineation failed")?;
            let elapsed = start.elapsed();

            write_json(&feature(&result, json!({})), output.as_ref())?;
            eprintln!(
                "Delineated {:.1} km² on tier '{}' in {:.2?}",
                result.area_m2 / 1.0e6,
                result.tier,
                elapsed
            );
        }

        // ── Batch ────────────────────────────────────────────────────
        Commands::Batch {
            config,
            input,
            output,
            crs,
            output_crs,
            simplify,
            max_cells,
        } => {
            let delineator = build_delineator(&config, &output_crs, simplify, max_cells)?;
            let input_crs = Crs::parse(&crs).context("Invalid input CRS")?;
            let points = read_points(&input)?;

            let pb = ProgressBar::new(points.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{bar:40.green} {pos}/{len} {msg}")
                    .unwrap(),
            );

            let start = Instant::now();
            let mut features = Vec::with_capacity(points.len());
            let mut failures = 0usize;
            for (i, (x, y, properties)) in points.into_iter().enumerate() {
                match delineator.delineate(x, y, &input_crs) {
                    Ok(result) => features.push(feature(&result, properties)),
                    Err(err) => {
                        warn!("Point {} ({}, {}) failed: {}", i, x, y, err);
                        failures += 1;
                    }
                }
                pb.inc(1);
            }
            pb.finish_and_clear();

            let collection = json!({
                "type": "FeatureCollection",
                "features": features,
            });
            write_json(&collection, Some(&output))?;

            println!("Watersheds saved to: {}", output.display());
            println!(
                "  {} delineated, {} failed, {:.2?} total",
                collection["features"].as_array().map_or(0, Vec::len),
                failures,
                start.elapsed()
            );
        }
    }

    Ok(())
}
