/// Classifier tool: trains a Random Forest on training points sampled from a
/// composite stack, classifies every AOI pixel and writes the model, the
/// class raster and the forest diagnostics.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde::Serialize;

use landcover_core::{CompositeStack, LabelledPoint, LayerSet, Pipeline, RunConfig};

#[derive(Parser, Debug)]
#[command(name = "classifier", about = "Train a Random Forest and classify the AOI")]
struct Args {
    /// Run config JSON (missing fields take their defaults).
    #[arg(long)]
    config: Option<PathBuf>,

    /// GeoJSON FeatureCollection with the "aoi" polygon.
    #[arg(long)]
    layers: PathBuf,

    /// Composite stack JSON written by `composite`.
    #[arg(long)]
    stack: PathBuf,

    /// Training points JSON written by `sampler`.
    #[arg(long)]
    points: PathBuf,

    /// Number of trees (10-500).
    #[arg(long)]
    trees: Option<usize>,

    #[arg(long, default_value = "model.json")]
    model_out: PathBuf,

    #[arg(long, default_value = "classified.json")]
    raster_out: PathBuf,

    #[arg(long, default_value = "diagnostics.json")]
    diagnostics_out: PathBuf,
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
    if let Some(n) = args.trees {
        config.n_trees = n;
    }

    let layers = LayerSet::from_geojson_str(&read(&args.layers)?)?;
    let stack: CompositeStack = serde_json::from_str(&read(&args.stack)?).context("parsing composite stack")?;
    let points: Vec<LabelledPoint> = serde_json::from_str(&read(&args.points)?).context("parsing training points")?;

    let pipeline = Pipeline::new(config, &layers)?;
    let classifier = pipeline.train(Some(&stack), &points)?;
    write_json(&args.model_out, &classifier)?;

    let classified = pipeline.classify(&classifier, &stack)?;
    write_json(&args.raster_out, &classified)?;

    let diagnostics = classifier.explain();
    if let Some(e) = diagnostics.out_of_bag_error {
        info!("out-of-bag error: {e:.4}");
    }
    write_json(&args.diagnostics_out, &diagnostics)?;
    info!(
        "wrote model to {}, classes to {}",
        args.model_out.display(),
        args.raster_out.display()
    );
    Ok(())
}
