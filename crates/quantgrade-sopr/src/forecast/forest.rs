//! Bagged regression trees.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::tree::{RegressionTree, TreeParams};

#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    /// Fit `n_trees` trees, each on a bootstrap resample drawn from a
    /// generator seeded with `seed`.
    pub fn fit(x: &[Vec<f64>], y: &[f64], n_trees: usize, params: TreeParams, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = x.len();
        let trees = (0..n_trees.max(1))
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n.max(1))).collect();
                RegressionTree::fit(x, y, &sample, params)
            })
            .collect();
        Self { trees }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    /// Mean of the per-tree normalised importances.
    pub fn importances(&self) -> Vec<f64> {
        average_importances(self.trees.iter().map(RegressionTree::importances))
    }
}

pub(crate) fn average_importances<'a>(per_tree: impl Iterator<Item = &'a [f64]>) -> Vec<f64> {
    let mut total: Vec<f64> = Vec::new();
    let mut count = 0usize;
    for imp in per_tree {
        if total.is_empty() {
            total = vec![0.0; imp.len()];
        }
        for (t, v) in total.iter_mut().zip(imp) {
            *t += v;
        }
        count += 1;
    }
    if count > 0 {
        for t in total.iter_mut() {
            *t /= count as f64;
        }
    }
    total
}
