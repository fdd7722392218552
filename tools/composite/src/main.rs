/// Composite tool: reads digitised layers, an image catalog and an elevation
/// raster, and writes the multi-period composite stack as JSON.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use log::info;
use serde::Serialize;

use landcover_core::composite::Statistic;
use landcover_core::{ImageCatalog, LayerSet, Pipeline, Raster, RunConfig, Seasons, Sensor};

#[derive(Parser, Debug)]
#[command(name = "composite", about = "Build a cloud-masked temporal composite over the AOI")]
struct Args {
    /// Run config JSON (missing fields take their defaults).
    #[arg(long)]
    config: Option<PathBuf>,

    /// GeoJSON FeatureCollection with the "aoi" polygon and training features.
    #[arg(long)]
    layers: PathBuf,

    /// Image catalog JSON.
    #[arg(long)]
    catalog: PathBuf,

    /// Elevation raster JSON.
    #[arg(long)]
    dem: PathBuf,

    /// Image collection id, e.g. COPERNICUS/S2_SR.
    #[arg(long)]
    sensor: Option<Sensor>,

    /// Date windows in months, e.g. "0,3:3,6:6,9:9,12".
    #[arg(long)]
    seasons: Option<Seasons>,

    /// Baseline date (YYYY-MM-DD).
    #[arg(long)]
    base_date: Option<NaiveDate>,

    /// Maximum scene cloud cover, percent.
    #[arg(long)]
    cloud: Option<f64>,

    /// Per-pixel reducer: "median" or "mean".
    #[arg(long)]
    statistic: Option<Statistic>,

    #[arg(short, long, default_value = "composite.json")]
    output: PathBuf,

    /// Also write RGB preview parameters for every period.
    #[arg(long)]
    viz: Option<PathBuf>,
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(p) => RunConfig::from_json_str(&read(p)?)?,
        None => RunConfig::default(),
    };
    if let Some(s) = args.sensor {
        config.sensor = s;
    }
    if let Some(s) = args.seasons.clone() {
        config.seasons = s;
    }
    if let Some(d) = args.base_date {
        config.base_date = d;
    }
    if let Some(c) = args.cloud {
        config.max_cloud_cover = c;
    }
    if let Some(s) = args.statistic {
        config.statistic = s;
    }

    let layers = LayerSet::from_geojson_str(&read(&args.layers)?)?;
    let catalog = ImageCatalog::from_json_str(&read(&args.catalog)?)?;
    let dem: Raster = serde_json::from_str(&read(&args.dem)?).context("parsing elevation raster")?;

    let pipeline = Pipeline::new(config, &layers)?;
    pipeline.aoi_summary()?;
    let stack = pipeline.build_composite(&catalog, &dem)?;
    write_json(&args.output, &stack)?;
    info!("wrote {} bands to {}", stack.band_names().len(), args.output.display());

    if let Some(path) = &args.viz {
        let profile = pipeline.config().sensor.profile();
        let viz: Vec<_> = (0..pipeline.config().seasons.len()).map(|i| profile.viz_params(i)).collect();
        write_json(path, &viz)?;
    }
    Ok(())
}
