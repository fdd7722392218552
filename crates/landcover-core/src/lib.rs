//! Supervised land-cover classification core.
//!
//! Stages run in data-dependency order: cloud masking and temporal
//! compositing (`mask`, `composite`), polygon partitioning and stratified
//! sampling (`partition`, `sampler`), feature extraction (`extract`), Random
//! Forest training and inference (`forest`, `classifier`) and accuracy
//! assessment (`accuracy`). `pipeline` wires them together from a
//! `RunConfig`.

pub mod accuracy;
pub mod classifier;
pub mod composite;
pub mod config;
pub mod error;
pub mod extract;
pub mod forest;
pub mod imagery;
pub mod layers;
pub mod mask;
pub mod partition;
pub mod pipeline;
pub mod raster;
pub mod sampler;
pub mod season;
pub mod sensor;
pub mod terrain;

pub use accuracy::{validate_classification, AccuracyReport, ErrorMatrix};
pub use classifier::{ClassifiedRaster, ForestDiagnostics, TrainedClassifier};
pub use composite::{CompositeBuilder, CompositeStack, Statistic};
pub use config::RunConfig;
pub use error::{PipelineError, Result};
pub use extract::{extract_features, FeatureTable};
pub use imagery::{ImageCatalog, ImagerySource};
pub use layers::{ClassId, LayerSet, Legend};
pub use partition::{HoldoutSplit, PartitionFilter};
pub use pipeline::{Pipeline, RunOutput};
pub use raster::{Band, GridSpec, Raster};
pub use sampler::LabelledPoint;
pub use season::{parse_windows, Seasons};
pub use sensor::{Sensor, SensorProfile};
