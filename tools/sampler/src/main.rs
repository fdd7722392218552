/// Point sampling tool: partitions the digitised features into training and
/// validation parts and writes a class-balanced point set for each.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde::Serialize;

use landcover_core::{LayerSet, Pipeline, RunConfig, Sensor};

#[derive(Parser, Debug)]
#[command(name = "sampler", about = "Write stratified training and validation points")]
struct Args {
    /// Run config JSON (missing fields take their defaults).
    #[arg(long)]
    config: Option<PathBuf>,

    /// GeoJSON FeatureCollection with the "aoi" polygon and training features.
    #[arg(long)]
    layers: PathBuf,

    /// Sensor whose resolution sets the sampling grid.
    #[arg(long)]
    sensor: Option<Sensor>,

    /// Training points per class.
    #[arg(long)]
    points: Option<usize>,

    /// Percentage of polygon parts held out for validation.
    #[arg(long)]
    validation: Option<f64>,

    #[arg(long)]
    training_seed: Option<u64>,

    #[arg(long)]
    validation_seed: Option<u64>,

    /// Seed of the per-part split value; shared by both point sets.
    #[arg(long)]
    partition_seed: Option<u64>,

    /// Integer feature property holding the class id.
    #[arg(long)]
    property: Option<String>,

    /// Sampling scale in metres (default: sensor resolution).
    #[arg(long)]
    scale: Option<f64>,

    #[arg(long, default_value = "training_points.json")]
    training_out: PathBuf,

    #[arg(long, default_value = "validation_points.json")]
    validation_out: PathBuf,

    /// Also write the class legend.
    #[arg(long)]
    legend: Option<PathBuf>,
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
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
    if let Some(n) = args.points {
        config.training_points_per_class = n;
    }
    if let Some(p) = args.validation {
        config.validation_percent = p;
    }
    if let Some(s) = args.training_seed {
        config.training_seed = s;
    }
    if let Some(s) = args.validation_seed {
        config.validation_seed = s;
    }
    if let Some(s) = args.partition_seed {
        config.partition_seed = s;
    }
    if let Some(p) = &args.property {
        config.class_property = p.clone();
    }
    if args.scale.is_some() {
        config.scale = args.scale;
    }

    let layers = LayerSet::from_geojson_str(&read(&args.layers)?)?;
    let pipeline = Pipeline::new(config, &layers)?;
    pipeline.aoi_summary()?;

    let training = pipeline.sample_training()?;
    write_json(&args.training_out, &training)?;
    info!("wrote {} training points to {}", training.len(), args.training_out.display());

    let validation = pipeline.sample_validation()?;
    write_json(&args.validation_out, &validation)?;
    info!("wrote {} validation points to {}", validation.len(), args.validation_out.display());

    if let Some(path) = &args.legend {
        write_json(path, &pipeline.legend())?;
    }
    Ok(())
}
