//! Classifier training and per-pixel inference over a composite stack.

use std::collections::BTreeMap;

use geo::{Contains, Point, Polygon};
use log::info;
use serde::{Deserialize, Serialize};

#[cfg(feature = "threading")]
use rayon::prelude::*;

use crate::composite::CompositeStack;
use crate::error::{PipelineError, Result};
use crate::extract::FeatureTable;
use crate::forest::{ForestParams, RandomForest};
use crate::layers::ClassId;
use crate::raster::GridSpec;

/// A fitted forest plus the band order it was trained on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedClassifier {
    pub forest: RandomForest,
    pub band_order: Vec<String>,
    pub class_property: String,
}

/// One class id per pixel; `None` outside the AOI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedRaster {
    pub grid: GridSpec,
    pub classes: Vec<Option<ClassId>>,
}

impl ClassifiedRaster {
    pub fn get(&self, row: usize, col: usize) -> Option<ClassId> {
        self.classes[row * self.grid.width + col]
    }

    /// Pixel count per class.
    pub fn histogram(&self) -> BTreeMap<ClassId, usize> {
        let mut h = BTreeMap::new();
        for c in self.classes.iter().flatten() {
            *h.entry(*c).or_insert(0) += 1;
        }
        h
    }
}

/// Model explanation for the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestDiagnostics {
    pub n_trees: usize,
    pub classes: Vec<ClassId>,
    pub out_of_bag_error: Option<f64>,
    /// Band name → normalised Gini importance.
    pub importance: BTreeMap<String, f64>,
    /// Node count summed over every tree.
    pub total_nodes: usize,
    pub mean_depth: f64,
    pub max_depth: usize,
}

impl TrainedClassifier {
    /// Train on `table` with `n_trees` trees and otherwise default
    /// hyper-parameters.
    pub fn train(table: &FeatureTable, n_trees: usize, class_property: &str) -> Result<Self> {
        let params = ForestParams { n_trees, ..ForestParams::default() };
        Self::train_with(table, &params, class_property)
    }

    pub fn train_with(table: &FeatureTable, params: &ForestParams, class_property: &str) -> Result<Self> {
        if table.is_empty() {
            return Err(PipelineError::degenerate("feature table is empty"));
        }
        let rows: Vec<Vec<f32>> = table.rows.iter().map(|r| r.values.clone()).collect();
        let labels: Vec<ClassId> = table.rows.iter().map(|r| r.class_id).collect();
        let forest = RandomForest::fit(&rows, &labels, params)?;
        info!(
            "trained {} trees on {} rows over {} bands",
            forest.n_trees(),
            rows.len(),
            table.n_features()
        );
        Ok(Self {
            forest,
            band_order: table.band_order.clone(),
            class_property: class_property.to_string(),
        })
    }

    /// Error unless `found` equals the training band order.
    pub fn check_bands(&self, found: &[String]) -> Result<()> {
        if found != self.band_order.as_slice() {
            return Err(PipelineError::FeatureMismatch {
                expected: self.band_order.clone(),
                found: found.to_vec(),
            });
        }
        Ok(())
    }

    pub fn predict(&self, values: &[f32]) -> ClassId {
        self.forest.predict(values)
    }

    /// Classify every pixel of `stack` whose centre lies in `aoi`.
    pub fn classify(&self, stack: &CompositeStack, aoi: &Polygon<f64>) -> Result<ClassifiedRaster> {
        self.check_bands(&stack.band_names())?;
        let grid = stack.grid();
        let pixel = |idx: usize| {
            let (row, col) = (idx / grid.width, idx % grid.width);
            let (lon, lat) = grid.pixel_center(row, col);
            aoi.contains(&Point::new(lon, lat))
                .then(|| self.forest.predict(&stack.raster.pixel(row, col)))
        };

        #[cfg(feature = "threading")]
        let classes: Vec<Option<ClassId>> = (0..grid.len()).into_par_iter().map(pixel).collect();
        #[cfg(not(feature = "threading"))]
        let classes: Vec<Option<ClassId>> = (0..grid.len()).map(pixel).collect();

        let out = ClassifiedRaster { grid, classes };
        info!("classified {} pixels: {:?}", out.classes.iter().flatten().count(), out.histogram());
        Ok(out)
    }

    pub fn explain(&self) -> ForestDiagnostics {
        let trees = self.forest.trees();
        let depths: Vec<usize> = trees.iter().map(|t| t.depth()).collect();
        ForestDiagnostics {
            n_trees: self.forest.n_trees(),
            classes: self.forest.classes().to_vec(),
            out_of_bag_error: self.forest.oob_error(),
            importance: self
                .band_order
                .iter()
                .cloned()
                .zip(self.forest.importance().iter().copied())
                .collect(),
            total_nodes: trees.iter().map(|t| t.n_nodes()).sum(),
            mean_depth: depths.iter().sum::<usize>() as f64 / depths.len().max(1) as f64,
            max_depth: depths.iter().copied().max().unwrap_or(0),
        }
    }
}
