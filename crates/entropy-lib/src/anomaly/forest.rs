//! Isolation forest
//!
//! Each tree isolates points through random feature/threshold splits on a
//! subsample of the data. Anomalies need fewer splits, so a short average
//! path length across the ensemble maps to a high anomaly score.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Euler-Mascheroni constant
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Default number of trees
pub const DEFAULT_N_ESTIMATORS: usize = 100;

/// Default per-tree subsample size
pub const DEFAULT_MAX_SAMPLES: usize = 256;

/// Average path length of an unsuccessful BST search over `n` points.
/// Normalizes isolation depths.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile (`q` in [0, 100]) of `values`
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Forest hyper-parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestConfig {
    pub n_estimators: usize,
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: DEFAULT_N_ESTIMATORS,
            max_samples: DEFAULT_MAX_SAMPLES,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn fit(data: &[Vec<f64>], indices: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        Self {
            root: build_node(data, indices, 0, height_limit, rng),
        }
    }

    fn path_length(&self, point: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;
        loop {
            match node {
                Node::Leaf { size } => return depth as f64 + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = point.get(*feature).copied().unwrap_or(0.0);
                    node = if value < *threshold { left } else { right };
                    depth += 1;
                }
            }
        }
    }
}

fn build_node(
    data: &[Vec<f64>],
    indices: Vec<usize>,
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= height_limit || indices.len() <= 1 {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    // Only features that still vary within this node can split it
    let width = data[indices[0]].len();
    let splittable: Vec<(usize, f64, f64)> = (0..width)
        .filter_map(|feature| {
            let (min, max) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |acc, &i| {
                let v = data[i][feature];
                (acc.0.min(v), acc.1.max(v))
            });
            (max > min && min.is_finite() && max.is_finite()).then_some((feature, min, max))
        })
        .collect();

    if splittable.is_empty() {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    let (feature, min, max) = splittable[rng.gen_range(0..splittable.len())];
    let span = max - min;
    let mut threshold = if span.is_finite() {
        rng.gen_range(min..max)
    } else {
        min / 2.0 + max / 2.0
    };
    if threshold <= min {
        // Keep at least one point on each side
        threshold = min + (max - min) / 2.0;
    }

    let (left, right): (Vec<usize>, Vec<usize>) =
        indices.into_iter().partition(|&i| data[i][feature] < threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_node(data, left, depth + 1, height_limit, rng)),
        right: Box::new(build_node(data, right, depth + 1, height_limit, rng)),
    }
}

/// Per-tree RNG seed mixed from the forest seed and the tree index
/// (splitmix64 finalizer), so trees do not depend on build order.
fn tree_seed(seed: u64, index: usize) -> u64 {
    let mut z = seed ^ (index as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Trained isolation forest
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    subsample_size: usize,
}

impl IsolationForest {
    /// Train on `data` (rows of equal width). Trees are built in parallel.
    pub fn fit(data: &[Vec<f64>], config: &ForestConfig) -> Self {
        let n = data.len();
        let subsample_size = config.max_samples.max(1).min(n.max(1));
        let height_limit = (subsample_size as f64).log2().ceil().max(0.0) as usize;
        let n_estimators = config.n_estimators.max(1);

        if n == 0 {
            return Self {
                trees: Vec::new(),
                subsample_size,
            };
        }

        let build_tree = |index: usize| {
            let mut rng = StdRng::seed_from_u64(tree_seed(config.seed, index));
            let indices = sample(&mut rng, n, subsample_size).into_vec();
            IsolationTree::fit(data, indices, height_limit, &mut rng)
        };

        // Collected in index order; tree contents depend only on their index
        let trees: Vec<IsolationTree> = (0..n_estimators)
            .into_par_iter()
            .map(build_tree)
            .collect();

        Self {
            trees,
            subsample_size,
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Mean path length of `point` across all trees
    pub fn mean_path_length(&self, point: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.path_length(point)).sum::<f64>() / self.trees.len() as f64
    }

    /// Anomaly score `2^(-E[h(x)] / c(psi))` in (0, 1]; higher is more anomalous
    pub fn score(&self, point: &[f64]) -> f64 {
        let normalizer = average_path_length(self.subsample_size);
        if normalizer <= 0.0 {
            // A single-row subsample cannot separate anything
            return 0.5;
        }
        2f64.powf(-self.mean_path_length(point) / normalizer)
    }

    pub fn score_all(&self, data: &[Vec<f64>]) -> Vec<f64> {
        data.iter().map(|row| self.score(row)).collect()
    }
}
