//! Random Forest: bagged CART trees with per-split feature sampling.
//!
//! Every tree draws from its own `StdRng` seeded with `seed + tree_index`,
//! so the fitted forest is the same with or without the `threading` feature.

mod tree;

pub use tree::{DecisionTree, FeatureIndex, Node, NodeIndex, TreeParams};

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[cfg(feature = "threading")]
use rayon::prelude::*;

use crate::error::{PipelineError, Result};
use crate::layers::ClassId;
use tree::{argmax, TrainingSet};

/// Forest hyper-parameters. Defaults match the usual hosted Random Forest:
/// √p variables per split, leaves of one, half-sample bags, seed 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    /// `None` = ⌊√n_features⌋.
    pub variables_per_split: Option<usize>,
    pub min_leaf_population: usize,
    /// Bag size as a fraction of the rows. Below 1 rows are drawn without
    /// replacement; at 1 a classic bootstrap is used.
    pub bag_fraction: f64,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            variables_per_split: None,
            min_leaf_population: 1,
            bag_fraction: 0.5,
            seed: 0,
        }
    }
}

impl ForestParams {
    pub fn mtry(&self, n_features: usize) -> usize {
        self.variables_per_split
            .unwrap_or_else(|| (n_features as f64).sqrt().floor() as usize)
            .clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    /// Original class ids; trees vote with indices into this list.
    classes: Vec<ClassId>,
    n_features: usize,
    trees: Vec<DecisionTree>,
    /// Mean Gini decrease per feature, normalised to sum to 1.
    importance: Vec<f64>,
    /// Fraction of out-of-bag rows misclassified; `None` when no row was
    /// ever out of bag.
    oob_error: Option<f64>,
}

struct FittedTree {
    tree: DecisionTree,
    importance: Vec<f64>,
    out_of_bag: Vec<usize>,
}

fn fit_one(data: &TrainingSet<'_>, params: &ForestParams, index: usize, mtry: usize) -> FittedTree {
    let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(index as u64));
    let n = data.rows.len();

    let mut in_bag = vec![false; n];
    let sample: Vec<usize> = if params.bag_fraction >= 1.0 {
        (0..n).map(|_| rng.gen_range(0..n)).collect()
    } else {
        let size = ((n as f64 * params.bag_fraction).round() as usize).clamp(1, n);
        rand::seq::index::sample(&mut rng, n, size).into_vec()
    };
    for &i in &sample {
        in_bag[i] = true;
    }

    let mut importance = vec![0.0; data.rows[0].len()];
    let tree_params = TreeParams { mtry, min_leaf: params.min_leaf_population.max(1) };
    let tree = DecisionTree::fit(data, sample, tree_params, &mut rng, &mut importance);
    let out_of_bag = (0..n).filter(|&i| !in_bag[i]).collect();
    FittedTree { tree, importance, out_of_bag }
}

impl RandomForest {
    /// Fit on `rows` (one feature vector each) labelled by `labels`.
    pub fn fit(rows: &[Vec<f32>], labels: &[ClassId], params: &ForestParams) -> Result<Self> {
        if params.n_trees == 0 {
            return Err(PipelineError::config("a forest needs at least one tree"));
        }
        if rows.is_empty() || rows.len() != labels.len() {
            return Err(PipelineError::degenerate(format!(
                "{} feature rows for {} labels",
                rows.len(),
                labels.len()
            )));
        }
        let n_features = rows[0].len();
        if n_features == 0 || rows.iter().any(|r| r.len() != n_features) {
            return Err(PipelineError::degenerate("feature rows must share one non-zero width"));
        }

        let mut classes: Vec<ClassId> = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() < 2 {
            return Err(PipelineError::degenerate(format!(
                "training needs at least two classes, found {classes:?}"
            )));
        }
        let dense: Vec<usize> = labels
            .iter()
            .map(|c| classes.binary_search(c).unwrap_or_default())
            .collect();

        let data = TrainingSet { rows, labels: &dense, n_classes: classes.len() };
        let mtry = params.mtry(n_features);
        debug!(
            "fitting {} trees on {} rows, {} features, mtry {}",
            params.n_trees,
            rows.len(),
            n_features,
            mtry
        );

        #[cfg(feature = "threading")]
        let fitted: Vec<FittedTree> =
            (0..params.n_trees).into_par_iter().map(|t| fit_one(&data, params, t, mtry)).collect();
        #[cfg(not(feature = "threading"))]
        let fitted: Vec<FittedTree> = (0..params.n_trees).map(|t| fit_one(&data, params, t, mtry)).collect();

        // ── Aggregate in tree order ──
        let mut importance = vec![0.0; n_features];
        let mut oob_votes = vec![vec![0usize; classes.len()]; rows.len()];
        for f in &fitted {
            for (acc, v) in importance.iter_mut().zip(&f.importance) {
                *acc += v;
            }
            for &i in &f.out_of_bag {
                oob_votes[i][f.tree.predict(&rows[i])] += 1;
            }
        }
        let total: f64 = importance.iter().sum();
        if total > 0.0 {
            importance.iter_mut().for_each(|v| *v /= total);
        }

        let mut n_oob = 0usize;
        let mut n_wrong = 0usize;
        for (votes, &truth) in oob_votes.iter().zip(&dense) {
            if votes.iter().any(|&v| v > 0) {
                n_oob += 1;
                if argmax(votes) != truth {
                    n_wrong += 1;
                }
            }
        }
        let oob_error = (n_oob > 0).then(|| n_wrong as f64 / n_oob as f64);
        if let Some(e) = oob_error {
            info!("random forest: {} trees, out-of-bag error {:.4}", params.n_trees, e);
        }

        Ok(Self {
            classes,
            n_features,
            trees: fitted.into_iter().map(|f| f.tree).collect(),
            importance,
            oob_error,
        })
    }

    /// Majority vote over all trees; ties go to the smaller class id.
    pub fn predict(&self, row: &[f32]) -> ClassId {
        let mut votes = vec![0usize; self.classes.len()];
        for t in &self.trees {
            votes[t.predict(row)] += 1;
        }
        self.classes[argmax(&votes)]
    }

    pub fn classes(&self) -> &[ClassId] {
        &self.classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn importance(&self) -> &[f64] {
        &self.importance
    }

    pub fn oob_error(&self) -> Option<f64> {
        self.oob_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two well-separated clusters on feature 0, noise on feature 1.
    fn blobs() -> (Vec<Vec<f32>>, Vec<ClassId>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..60 {
            let noise = (i * 37 % 11) as f32;
            if i % 2 == 0 {
                rows.push(vec![10.0 + (i % 5) as f32, noise]);
                labels.push(3);
            } else {
                rows.push(vec![50.0 + (i % 5) as f32, noise]);
                labels.push(8);
            }
        }
        (rows, labels)
    }

    #[test]
    fn separable_classes_are_learned() {
        let (rows, labels) = blobs();
        let params = ForestParams { n_trees: 25, variables_per_split: Some(2), ..Default::default() };
        let rf = RandomForest::fit(&rows, &labels, &params).unwrap();
        assert_eq!(rf.classes(), &[3, 8]);
        assert_eq!(rf.predict(&[12.0, 4.0]), 3);
        assert_eq!(rf.predict(&[52.0, 4.0]), 8);
        assert_eq!(rf.oob_error(), Some(0.0));
        assert!(rf.importance()[0] > 0.99);
    }

    #[test]
    fn same_seed_same_forest() {
        let (rows, labels) = blobs();
        let params = ForestParams { n_trees: 10, ..Default::default() };
        let a = RandomForest::fit(&rows, &labels, &params).unwrap();
        let b = RandomForest::fit(&rows, &labels, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn default_mtry_is_floor_sqrt() {
        let p = ForestParams::default();
        assert_eq!(p.mtry(27), 5);
        assert_eq!(p.mtry(1), 1);
        assert_eq!(p.mtry(3), 1);
    }

    #[test]
    fn single_class_is_degenerate() {
        let rows = vec![vec![1.0], vec![2.0]];
        let err = RandomForest::fit(&rows, &[1, 1], &ForestParams::default()).unwrap_err();
        assert!(matches!(err, PipelineError::DegenerateInput(_)));
    }

    #[test]
    fn model_survives_json() {
        let (rows, labels) = blobs();
        let params = ForestParams { n_trees: 5, ..Default::default() };
        let rf = RandomForest::fit(&rows, &labels, &params).unwrap();
        let back: RandomForest = serde_json::from_str(&serde_json::to_string(&rf).unwrap()).unwrap();
        assert_eq!(back.predict(&[52.0, 1.0]), rf.predict(&[52.0, 1.0]));
    }
}
