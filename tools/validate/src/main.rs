/// Validation tool: scores a saved classifier against held-out points
/// without reclassifying the AOI.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use landcover_core::{validate_classification, CompositeStack, LabelledPoint, TrainedClassifier};

#[derive(Parser, Debug)]
#[command(name = "validate", about = "Confusion matrix, accuracies and kappa for a saved model")]
struct Args {
    /// Model JSON written by `classifier`.
    #[arg(long)]
    model: PathBuf,

    /// Composite stack JSON the model was trained on.
    #[arg(long)]
    stack: PathBuf,

    /// Validation points JSON written by `sampler`.
    #[arg(long)]
    points: PathBuf,

    #[arg(short, long, default_value = "accuracy.json")]
    output: PathBuf,
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();
    let args = Args::parse();

    let classifier: TrainedClassifier = serde_json::from_str(&read(&args.model)?).context("parsing model")?;
    let stack: CompositeStack = serde_json::from_str(&read(&args.stack)?).context("parsing composite stack")?;
    let points: Vec<LabelledPoint> =
        serde_json::from_str(&read(&args.points)?).context("parsing validation points")?;

    let report = validate_classification(&points, &stack, &classifier)?;
    for (i, class_id) in report.matrix.labels.iter().enumerate() {
        info!(
            "class {class_id}: producer's {:.3}, consumer's {:.3}",
            report.producers_accuracy[i], report.consumers_accuracy[i]
        );
    }
    info!("error matrix: {:?}", report.matrix.to_array());

    let json = serde_json::to_string_pretty(&report)?;
    fs::write(&args.output, json).with_context(|| format!("writing {}", args.output.display()))?;
    info!("wrote accuracy report to {}", args.output.display());
    Ok(())
}
