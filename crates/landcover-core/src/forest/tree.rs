//! CART classification tree with Gini impurity.

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

pub type FeatureIndex = usize;
pub type NodeIndex = usize;

/// Arena node. Class labels are dense indices into the forest's class list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        class: usize,
        n_samples: usize,
    },
    Split {
        feature: FeatureIndex,
        threshold: f32,
        left: NodeIndex,
        right: NodeIndex,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    /// Candidate features drawn at every node.
    pub mtry: usize,
    /// Smallest number of samples a leaf may hold.
    pub min_leaf: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

/// Training view shared by every tree of a forest.
pub(crate) struct TrainingSet<'a> {
    pub rows: &'a [Vec<f32>],
    pub labels: &'a [usize],
    pub n_classes: usize,
}

struct Candidate {
    feature: FeatureIndex,
    threshold: f32,
    decrease: f64,
}

fn gini(counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    1.0 - counts.iter().map(|&c| (c as f64 / n).powi(2)).sum::<f64>()
}

/// Majority class; ties go to the lowest index.
pub(crate) fn argmax(counts: &[usize]) -> usize {
    let mut best = 0;
    for (i, &c) in counts.iter().enumerate() {
        if c > counts[best] {
            best = i;
        }
    }
    best
}

impl DecisionTree {
    /// Grow a tree on `sample` (indices into `data`, duplicates allowed).
    /// Impurity decrease per feature is accumulated into `importance`.
    pub(crate) fn fit(
        data: &TrainingSet<'_>,
        sample: Vec<usize>,
        params: TreeParams,
        rng: &mut StdRng,
        importance: &mut [f64],
    ) -> Self {
        let mut tree = DecisionTree { nodes: Vec::new() };
        tree.grow(data, sample, params, rng, importance);
        tree
    }

    fn grow(
        &mut self,
        data: &TrainingSet<'_>,
        sample: Vec<usize>,
        params: TreeParams,
        rng: &mut StdRng,
        importance: &mut [f64],
    ) -> NodeIndex {
        let mut counts = vec![0usize; data.n_classes];
        for &i in &sample {
            counts[data.labels[i]] += 1;
        }
        let n = sample.len();
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { class: argmax(&counts), n_samples: n });

        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        if pure || n < 2 * params.min_leaf {
            return id;
        }
        let Some(best) = best_split(data, &sample, &counts, params, rng) else {
            return id;
        };
        importance[best.feature] += best.decrease;

        let (left, right): (Vec<usize>, Vec<usize>) = sample
            .into_iter()
            .partition(|&i| data.rows[i][best.feature] <= best.threshold);
        let l = self.grow(data, left, params, rng, importance);
        let r = self.grow(data, right, params, rng, importance);
        self.nodes[id] = Node::Split { feature: best.feature, threshold: best.threshold, left: l, right: r };
        id
    }

    /// Dense class index for one feature vector.
    pub fn predict(&self, row: &[f32]) -> usize {
        let mut at = 0;
        loop {
            match &self.nodes[at] {
                Node::Leaf { class, .. } => return *class,
                Node::Split { feature, threshold, left, right } => {
                    at = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], at: NodeIndex) -> usize {
            match &nodes[at] {
                Node::Leaf { .. } => 1,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() { 0 } else { walk(&self.nodes, 0) }
    }
}

/// Best Gini split over `mtry` randomly drawn features. `None` when every
/// candidate feature is constant or no split leaves `min_leaf` on each side.
fn best_split(
    data: &TrainingSet<'_>,
    sample: &[usize],
    counts: &[usize],
    params: TreeParams,
    rng: &mut StdRng,
) -> Option<Candidate> {
    let n_features = data.rows[sample[0]].len();
    let n = sample.len();
    let parent = n as f64 * gini(counts, n);
    let mtry = params.mtry.clamp(1, n_features);

    let mut best: Option<Candidate> = None;
    let mut order: Vec<usize> = sample.to_vec();
    for feature in rand::seq::index::sample(rng, n_features, mtry).into_iter() {
        order.sort_by(|&a, &b| data.rows[a][feature].total_cmp(&data.rows[b][feature]));

        let mut left = vec![0usize; data.n_classes];
        let mut right = counts.to_vec();
        for k in 0..n - 1 {
            let c = data.labels[order[k]];
            left[c] += 1;
            right[c] -= 1;

            let here = data.rows[order[k]][feature];
            let next = data.rows[order[k + 1]][feature];
            let (nl, nr) = (k + 1, n - k - 1);
            if here == next || nl < params.min_leaf || nr < params.min_leaf {
                continue;
            }
            let child = nl as f64 * gini(&left, nl) + nr as f64 * gini(&right, nr);
            let decrease = parent - child;
            if decrease > 1e-12 && best.as_ref().map_or(true, |b| decrease > b.decrease) {
                best = Some(Candidate { feature, threshold: here + (next - here) / 2.0, decrease });
            }
        }
    }
    best
}
