//! Confusion matrix and accuracy statistics on held-out points.

use std::collections::BTreeMap;

use log::info;
use serde::{Deserialize, Serialize};

use crate::classifier::TrainedClassifier;
use crate::composite::CompositeStack;
use crate::error::{PipelineError, Result};
use crate::extract::extract_features;
use crate::layers::ClassId;
use crate::sampler::LabelledPoint;

/// Square confusion matrix. Rows are observed classes, columns predicted,
/// both in ascending class-id order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMatrix {
    pub labels: Vec<ClassId>,
    pub counts: Vec<Vec<u64>>,
}

impl ErrorMatrix {
    /// Build from `(observed, predicted)` pairs. The label set is the union
    /// of both sides.
    pub fn from_pairs(pairs: &[(ClassId, ClassId)]) -> Self {
        let mut labels: Vec<ClassId> = pairs.iter().flat_map(|&(o, p)| [o, p]).collect();
        labels.sort_unstable();
        labels.dedup();
        let index: BTreeMap<ClassId, usize> = labels.iter().enumerate().map(|(i, &c)| (c, i)).collect();

        let mut counts = vec![vec![0u64; labels.len()]; labels.len()];
        for (o, p) in pairs {
            counts[index[o]][index[p]] += 1;
        }
        Self { labels, counts }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    fn diagonal(&self) -> u64 {
        (0..self.labels.len()).map(|i| self.counts[i][i]).sum()
    }

    fn row_sum(&self, i: usize) -> u64 {
        self.counts[i].iter().sum()
    }

    fn col_sum(&self, j: usize) -> u64 {
        self.counts.iter().map(|row| row[j]).sum()
    }

    /// Correct / total; 0 for an empty matrix.
    pub fn overall_accuracy(&self) -> f64 {
        let n = self.total();
        if n == 0 { 0.0 } else { self.diagonal() as f64 / n as f64 }
    }

    /// Per observed class: correct / row total. Empty rows give 0.
    pub fn producers_accuracy(&self) -> Vec<f64> {
        (0..self.labels.len())
            .map(|i| ratio(self.counts[i][i], self.row_sum(i)))
            .collect()
    }

    /// Per predicted class: correct / column total. Empty columns give 0.
    pub fn consumers_accuracy(&self) -> Vec<f64> {
        (0..self.labels.len())
            .map(|j| ratio(self.counts[j][j], self.col_sum(j)))
            .collect()
    }

    /// Cohen's kappa, (p_o − p_e) / (1 − p_e). Defined as 0 when p_e = 1.
    pub fn kappa(&self) -> f64 {
        let n = self.total() as f64;
        if n == 0.0 {
            return 0.0;
        }
        let p_o = self.diagonal() as f64 / n;
        let p_e: f64 = (0..self.labels.len())
            .map(|i| self.row_sum(i) as f64 * self.col_sum(i) as f64)
            .sum::<f64>()
            / (n * n);
        if (1.0 - p_e).abs() < f64::EPSILON {
            0.0
        } else {
            (p_o - p_e) / (1.0 - p_e)
        }
    }

    /// Plain 2-D array for export.
    pub fn to_array(&self) -> Vec<Vec<u64>> {
        self.counts.clone()
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Everything the renderer shows for a validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    pub matrix: ErrorMatrix,
    pub overall_accuracy: f64,
    pub producers_accuracy: Vec<f64>,
    pub consumers_accuracy: Vec<f64>,
    pub kappa: f64,
    pub n_points: usize,
}

impl From<ErrorMatrix> for AccuracyReport {
    fn from(matrix: ErrorMatrix) -> Self {
        Self {
            overall_accuracy: matrix.overall_accuracy(),
            producers_accuracy: matrix.producers_accuracy(),
            consumers_accuracy: matrix.consumers_accuracy(),
            kappa: matrix.kappa(),
            n_points: matrix.total() as usize,
            matrix,
        }
    }
}

/// Classify held-out points with `classifier` and score them.
pub fn validate_classification(
    points: &[LabelledPoint],
    stack: &CompositeStack,
    classifier: &TrainedClassifier,
) -> Result<AccuracyReport> {
    let table = extract_features(Some(stack), points)?;
    classifier.check_bands(&table.band_order)?;
    if table.is_empty() {
        return Err(PipelineError::degenerate("no validation points"));
    }
    let pairs: Vec<(ClassId, ClassId)> = table
        .rows
        .iter()
        .map(|row| (row.class_id, classifier.predict(&row.values)))
        .collect();
    let report = AccuracyReport::from(ErrorMatrix::from_pairs(&pairs));
    info!(
        "validation on {} points: overall accuracy {:.4}, kappa {:.4}",
        report.n_points, report.overall_accuracy, report.kappa
    );
    Ok(report)
}
