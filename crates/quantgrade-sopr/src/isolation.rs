//! Isolation forest for multivariate outlier scoring.
//!
//! Scores follow the usual `2^(-E[h(x)] / c(psi))` definition: values near 1
//! are isolated quickly (anomalous), values well below 0.5 are ordinary.

use quantgrade_core::error::QuantError;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

use crate::stats;

const MAX_SAMPLES: usize = 256;
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone)]
enum INode {
    External(usize),
    Internal {
        feature: usize,
        split: f64,
        left: Box<INode>,
        right: Box<INode>,
    },
}

/// Average path length of an unsuccessful BST search over `n` points.
fn c_factor(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

fn build(rows: &[&Vec<f64>], depth: usize, limit: usize, rng: &mut StdRng) -> INode {
    if depth >= limit || rows.len() <= 1 {
        return INode::External(rows.len());
    }
    let dim = rows[0].len();
    // Only features that still vary can split the node.
    let candidates: Vec<(usize, f64, f64)> = (0..dim)
        .filter_map(|f| {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
                (lo.min(r[f]), hi.max(r[f]))
            });
            (hi > lo).then_some((f, lo, hi))
        })
        .collect();
    if candidates.is_empty() {
        return INode::External(rows.len());
    }
    let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
    let split = rng.gen_range(lo..hi);
    let (left, right): (Vec<&Vec<f64>>, Vec<&Vec<f64>>) =
        rows.iter().copied().partition(|r| r[feature] < split);
    INode::Internal {
        feature,
        split,
        left: Box::new(build(&left, depth + 1, limit, rng)),
        right: Box::new(build(&right, depth + 1, limit, rng)),
    }
}

fn path_length(node: &INode, row: &[f64], depth: usize) -> f64 {
    match node {
        INode::External(size) => depth as f64 + c_factor(*size),
        INode::Internal {
            feature,
            split,
            left,
            right,
        } => {
            if row[*feature] < *split {
                path_length(left, row, depth + 1)
            } else {
                path_length(right, row, depth + 1)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<INode>,
    sample_size: usize,
    threshold: f64,
}

impl IsolationForest {
    /// Fit `n_trees` trees on subsamples of at most 256 rows. The decision
    /// threshold is the training-score quantile at `1 - contamination`.
    pub fn fit(
        rows: &[Vec<f64>],
        n_trees: usize,
        contamination: f64,
        seed: u64,
    ) -> Result<Self, QuantError> {
        if rows.len() < 2 {
            return Err(QuantError::insufficient("isolation_forest", 2, rows.len()));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let sample_size = rows.len().min(MAX_SAMPLES);
        let limit = (sample_size as f64).log2().ceil() as usize;
        let trees = (0..n_trees.max(1))
            .map(|_| {
                let picked: Vec<&Vec<f64>> = sample(&mut rng, rows.len(), sample_size)
                    .into_iter()
                    .map(|i| &rows[i])
                    .collect();
                build(&picked, 0, limit, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            threshold: 0.5,
        };
        let scores: Vec<f64> = rows.iter().map(|r| forest.score(r)).collect();
        forest.threshold = stats::percentile(&scores, (1.0 - contamination) * 100.0);
        Ok(forest)
    }

    /// Anomaly score in `(0, 1]`.
    pub fn score(&self, row: &[f64]) -> f64 {
        let mean_path = self
            .trees
            .iter()
            .map(|t| path_length(t, row, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        let c = c_factor(self.sample_size);
        if c <= 0.0 {
            return 0.5;
        }
        2f64.powf(-mean_path / c)
    }

    /// Scores above this value are outliers.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud() -> Vec<Vec<f64>> {
        (0..200)
            .map(|i| {
                let t = i as f64;
                vec![(t * 0.37).sin(), (t * 0.91).cos()]
            })
            .collect()
    }

    #[test]
    fn test_outlier_scores_higher_than_inlier() {
        let forest = IsolationForest::fit(&cloud(), 100, 0.1, 42).unwrap();
        let inlier = forest.score(&[0.0, 0.0]);
        let outlier = forest.score(&[8.0, -8.0]);
        assert!(
            outlier > inlier,
            "outlier {outlier:.3} should exceed inlier {inlier:.3}"
        );
        assert!(outlier > forest.threshold());
    }

    #[test]
    fn test_constant_data_is_not_anomalous() {
        let rows = vec![vec![1.0, 1.0]; 50];
        let forest = IsolationForest::fit(&rows, 10, 0.1, 42).unwrap();
        let s = forest.score(&[1.0, 1.0]);
        assert!(s <= forest.threshold() + 1e-12);
    }

    #[test]
    fn test_needs_two_rows() {
        assert!(IsolationForest::fit(&[vec![1.0]], 10, 0.1, 42).is_err());
    }
}
