//! Gradient-boosted regression trees on squared loss.

use super::forest::average_importances;
use super::tree::{RegressionTree, TreeParams};

#[derive(Debug, Clone)]
pub struct GradientBoosting {
    init: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoosting {
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        n_stages: usize,
        learning_rate: f64,
        params: TreeParams,
    ) -> Self {
        let init = crate::stats::mean(y);
        let sample: Vec<usize> = (0..x.len()).collect();
        let mut current = vec![init; y.len()];
        let mut trees = Vec::with_capacity(n_stages);
        for _ in 0..n_stages {
            let residuals: Vec<f64> = y.iter().zip(&current).map(|(t, p)| t - p).collect();
            let tree = RegressionTree::fit(x, &residuals, &sample, params);
            for (p, row) in current.iter_mut().zip(x) {
                *p += learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }
        Self {
            init,
            learning_rate,
            trees,
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.init
            + self.learning_rate * self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    pub fn importances(&self) -> Vec<f64> {
        average_importances(self.trees.iter().map(RegressionTree::importances))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boosting_reduces_training_error() {
        let x: Vec<Vec<f64>> = (0..50).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..50).map(|i| ((i as f64) * 0.2).sin()).collect();
        let params = TreeParams {
            max_depth: 3,
            min_samples_leaf: 1,
        };
        let few = GradientBoosting::fit(&x, &y, 2, 0.1, params);
        let many = GradientBoosting::fit(&x, &y, 100, 0.1, params);
        let mse = |m: &GradientBoosting| {
            x.iter()
                .zip(&y)
                .map(|(r, t)| (m.predict(r) - t).powi(2))
                .sum::<f64>()
                / y.len() as f64
        };
        assert!(mse(&many) < mse(&few));
        assert!(mse(&many) < 0.01, "mse {}", mse(&many));
    }
}
