//! Run orchestrator: composite → sample → extract → train → classify →
//! validate, all driven by one `RunConfig`.

use geo::{BoundingRect, Polygon};
use log::info;
use serde::Serialize;

use crate::accuracy::{validate_classification, AccuracyReport};
use crate::classifier::{ClassifiedRaster, ForestDiagnostics, TrainedClassifier};
use crate::composite::{CompositeBuilder, CompositeStack};
use crate::config::RunConfig;
use crate::error::{PipelineError, Result};
use crate::extract::extract_features;
use crate::imagery::ImagerySource;
use crate::layers::{AoiSummary, LayerSet, Legend};
use crate::partition::PartitionFilter;
use crate::raster::{GridSpec, Raster};
use crate::sampler::{stratified_sample, LabelledPoint, SampleParams};
use crate::terrain::terrain_bands;

/// Everything one end-to-end run produces.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub aoi: AoiSummary,
    pub legend: Legend,
    pub stack: CompositeStack,
    pub classifier: TrainedClassifier,
    pub classified: ClassifiedRaster,
    pub diagnostics: ForestDiagnostics,
    pub accuracy: AccuracyReport,
}

/// One run over one set of digitised layers.
pub struct Pipeline<'a> {
    config: RunConfig,
    layers: &'a LayerSet,
}

impl<'a> Pipeline<'a> {
    /// Validates the config and requires an AOI up front.
    pub fn new(config: RunConfig, layers: &'a LayerSet) -> Result<Self> {
        config.validate()?;
        layers.aoi()?;
        Ok(Self { config, layers })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn aoi(&self) -> Result<&Polygon<f64>> {
        self.layers.aoi()
    }

    pub fn legend(&self) -> Legend {
        self.layers.legend(&self.config.class_property)
    }

    pub fn aoi_summary(&self) -> Result<AoiSummary> {
        Ok(AoiSummary::of(self.aoi()?))
    }

    // ── Stage 1-2: composite ──────────────────────────────────────────────────

    pub fn build_composite(&self, imagery: &dyn ImagerySource, dem: &Raster) -> Result<CompositeStack> {
        let builder = CompositeBuilder::new(self.config.sensor, self.config.max_cloud_cover, self.config.statistic);
        self.build_composite_with(builder, imagery, dem)
    }

    /// Same as `build_composite` with a caller-configured builder (band
    /// subset, context layers).
    pub fn build_composite_with(
        &self,
        builder: CompositeBuilder<'_>,
        imagery: &dyn ImagerySource,
        dem: &Raster,
    ) -> Result<CompositeStack> {
        let terrain = terrain_bands(dem)?;
        let stack = builder.build(imagery, self.aoi()?, &self.config.seasons, self.config.base_date, &terrain)?;
        info!("composite: {} bands on {}×{} pixels", stack.raster.bands.len(), stack.grid().width, stack.grid().height);
        Ok(stack)
    }

    // ── Stage 3-4: sampling ───────────────────────────────────────────────────

    /// Pixel lattice at the run's scale, anchored on the AOI bounds. The
    /// sampler lays its class surface on this lattice over the extent of
    /// the training features, which may reach past the AOI.
    pub fn sampling_grid(&self) -> Result<GridSpec> {
        let bounds = self
            .aoi()?
            .bounding_rect()
            .ok_or_else(|| PipelineError::config("the \"aoi\" polygon is empty"))?;
        Ok(GridSpec::covering(
            bounds.min().x,
            bounds.min().y,
            bounds.max().x,
            bounds.max().y,
            self.config.resolution_m(),
        ))
    }

    fn sample(&self, n: usize, seed: u64, filter: PartitionFilter) -> Result<Vec<LabelledPoint>> {
        let params = SampleParams {
            points_per_class: n,
            seed,
            class_property: &self.config.class_property,
            filter,
            partition_seed: self.config.partition_seed,
            grid: self.sampling_grid()?,
        };
        stratified_sample(self.layers, &params)
    }

    pub fn sample_training(&self) -> Result<Vec<LabelledPoint>> {
        let split = self.config.holdout();
        self.sample(self.config.training_points_per_class, self.config.training_seed, split.training())
    }

    pub fn sample_validation(&self) -> Result<Vec<LabelledPoint>> {
        let split = self.config.holdout();
        self.sample(self.config.validation_points_per_class(), self.config.validation_seed, split.validation())
    }

    // ── Stage 5-6: train and classify ─────────────────────────────────────────

    pub fn train(&self, stack: Option<&CompositeStack>, points: &[LabelledPoint]) -> Result<TrainedClassifier> {
        let table = extract_features(stack, points)?;
        TrainedClassifier::train(&table, self.config.n_trees, &self.config.class_property)
    }

    pub fn classify(&self, classifier: &TrainedClassifier, stack: &CompositeStack) -> Result<ClassifiedRaster> {
        classifier.classify(stack, self.aoi()?)
    }

    // ── Stage 7: accuracy ─────────────────────────────────────────────────────

    pub fn validate(
        &self,
        classifier: &TrainedClassifier,
        stack: &CompositeStack,
        points: &[LabelledPoint],
    ) -> Result<AccuracyReport> {
        validate_classification(points, stack, classifier)
    }

    /// All stages in order. Any stage error aborts the run.
    pub fn run(&self, imagery: &dyn ImagerySource, dem: &Raster) -> Result<RunOutput> {
        let aoi = self.aoi_summary()?;
        let stack = self.build_composite(imagery, dem)?;
        let training = self.sample_training()?;
        let classifier = self.train(Some(&stack), &training)?;
        let classified = self.classify(&classifier, &stack)?;
        let diagnostics = classifier.explain();
        let validation = self.sample_validation()?;
        let accuracy = self.validate(&classifier, &stack, &validation)?;
        Ok(RunOutput {
            aoi,
            legend: self.legend(),
            stack,
            classifier,
            classified,
            diagnostics,
            accuracy,
        })
    }
}
