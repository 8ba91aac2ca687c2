//! K-means and a diagonal gaussian mixture for regime and behavior
//! clustering.
//!
//! Plain `Vec<Vec<f64>>` rows, no linear-algebra crate. Both models are
//! seeded and fully deterministic for a given input.

use quantgrade_core::error::QuantError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const KMEANS_MAX_ITER: usize = 300;
const GMM_MAX_ITER: usize = 100;
const GMM_TOL: f64 = 1e-4;
const VAR_FLOOR: f64 = 1e-6;

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

fn check_rows(rows: &[Vec<f64>], k: usize) -> Result<usize, QuantError> {
    if k == 0 {
        return Err(QuantError::Model("cluster count must be positive".into()));
    }
    if rows.len() < k {
        return Err(QuantError::insufficient("clustering", k, rows.len()));
    }
    let dim = rows[0].len();
    if dim == 0 || rows.iter().any(|r| r.len() != dim || r.iter().any(|x| !x.is_finite())) {
        return Err(QuantError::Model("clustering rows must be finite and rectangular".into()));
    }
    Ok(dim)
}

/// Fitted k-means centroids.
#[derive(Debug, Clone)]
pub struct KMeans {
    centroids: Vec<Vec<f64>>,
}

impl KMeans {
    /// Fit with k-means++ seeding followed by Lloyd iterations.
    pub fn fit(rows: &[Vec<f64>], k: usize, seed: u64) -> Result<Self, QuantError> {
        let dim = check_rows(rows, k)?;
        let mut rng = StdRng::seed_from_u64(seed);

        let mut centroids = vec![rows[rng.gen_range(0..rows.len())].clone()];
        while centroids.len() < k {
            let dists: Vec<f64> = rows
                .iter()
                .map(|r| {
                    centroids
                        .iter()
                        .map(|c| sq_dist(r, c))
                        .fold(f64::INFINITY, f64::min)
                })
                .collect();
            let total: f64 = dists.iter().sum();
            let next = if total > 0.0 {
                let mut target = rng.gen::<f64>() * total;
                let mut chosen = rows.len() - 1;
                for (i, d) in dists.iter().enumerate() {
                    if target < *d {
                        chosen = i;
                        break;
                    }
                    target -= d;
                }
                chosen
            } else {
                rng.gen_range(0..rows.len())
            };
            centroids.push(rows[next].clone());
        }

        let mut model = Self { centroids };
        let mut assignment = vec![usize::MAX; rows.len()];
        for _ in 0..KMEANS_MAX_ITER {
            let mut changed = false;
            for (i, r) in rows.iter().enumerate() {
                let c = model.nearest(r);
                if assignment[i] != c {
                    assignment[i] = c;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
            let mut sums = vec![vec![0.0; dim]; k];
            let mut counts = vec![0usize; k];
            for (r, &c) in rows.iter().zip(&assignment) {
                counts[c] += 1;
                for (s, x) in sums[c].iter_mut().zip(r) {
                    *s += x;
                }
            }
            for c in 0..k {
                // Empty clusters keep their previous centroid.
                if counts[c] > 0 {
                    model.centroids[c] = sums[c].iter().map(|s| s / counts[c] as f64).collect();
                }
            }
        }
        Ok(model)
    }

    fn nearest(&self, row: &[f64]) -> usize {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (i, c) in self.centroids.iter().enumerate() {
            let d = sq_dist(row, c);
            if d < best_dist {
                best = i;
                best_dist = d;
            }
        }
        best
    }

    /// Index of the closest centroid.
    pub fn predict(&self, row: &[f64]) -> usize {
        self.nearest(row)
    }

    pub fn centroids(&self) -> &[Vec<f64>] {
        &self.centroids
    }
}

/// Gaussian mixture with diagonal covariances, fitted by EM.
#[derive(Debug, Clone)]
pub struct GaussianMixture {
    weights: Vec<f64>,
    means: Vec<Vec<f64>>,
    variances: Vec<Vec<f64>>,
}

impl GaussianMixture {
    /// Fit `k` components, initialised from a seeded k-means run.
    pub fn fit(rows: &[Vec<f64>], k: usize, seed: u64) -> Result<Self, QuantError> {
        let dim = check_rows(rows, k)?;
        let init = KMeans::fit(rows, k, seed)?;
        let n = rows.len();

        let mut global_var = vec![0.0; dim];
        for d in 0..dim {
            let col: Vec<f64> = rows.iter().map(|r| r[d]).collect();
            global_var[d] = crate::stats::std(&col).powi(2).max(VAR_FLOOR);
        }

        let mut model = Self {
            weights: vec![1.0 / k as f64; k],
            means: init.centroids.clone(),
            variances: vec![global_var; k],
        };

        let mut prev_ll = f64::NEG_INFINITY;
        let mut resp = vec![vec![0.0; k]; n];
        for _ in 0..GMM_MAX_ITER {
            // E-step
            let mut ll = 0.0;
            for (i, r) in rows.iter().enumerate() {
                let log_p: Vec<f64> = (0..k).map(|c| model.log_joint(r, c)).collect();
                let norm = log_sum_exp(&log_p);
                ll += norm;
                for c in 0..k {
                    resp[i][c] = (log_p[c] - norm).exp();
                }
            }

            // M-step
            for c in 0..k {
                let nk: f64 = resp.iter().map(|r| r[c]).sum::<f64>() + 1e-10;
                model.weights[c] = nk / n as f64;
                for d in 0..dim {
                    let mu = rows.iter().zip(&resp).map(|(r, g)| g[c] * r[d]).sum::<f64>() / nk;
                    let var = rows
                        .iter()
                        .zip(&resp)
                        .map(|(r, g)| g[c] * (r[d] - mu).powi(2))
                        .sum::<f64>()
                        / nk;
                    model.means[c][d] = mu;
                    model.variances[c][d] = var.max(VAR_FLOOR);
                }
            }

            if !ll.is_finite() {
                return Err(QuantError::Numerical("mixture log-likelihood diverged".into()));
            }
            if (ll - prev_ll).abs() < GMM_TOL * n as f64 {
                break;
            }
            prev_ll = ll;
        }
        Ok(model)
    }

    fn log_joint(&self, row: &[f64], c: usize) -> f64 {
        let mut lp = self.weights[c].max(1e-300).ln();
        for ((x, mu), var) in row.iter().zip(&self.means[c]).zip(&self.variances[c]) {
            lp -= 0.5 * ((2.0 * std::f64::consts::PI * var).ln() + (x - mu).powi(2) / var);
        }
        lp
    }

    /// Posterior component probabilities for one row.
    pub fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        let log_p: Vec<f64> = (0..self.weights.len()).map(|c| self.log_joint(row, c)).collect();
        let norm = log_sum_exp(&log_p);
        log_p.iter().map(|lp| (lp - norm).exp()).collect()
    }

    pub fn means(&self) -> &[Vec<f64>] {
        &self.means
    }
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> Vec<Vec<f64>> {
        let mut rows = Vec::new();
        for i in 0..20 {
            let jitter = (i as f64 * 0.7).sin() * 0.1;
            rows.push(vec![0.0 + jitter, 0.0 - jitter]);
            rows.push(vec![5.0 - jitter, 5.0 + jitter]);
        }
        rows
    }

    #[test]
    fn test_kmeans_separates_blobs() {
        let rows = two_blobs();
        let km = KMeans::fit(&rows, 2, 42).unwrap();
        let a = km.predict(&[0.0, 0.0]);
        let b = km.predict(&[5.0, 5.0]);
        assert_ne!(a, b, "blobs should land in different clusters");
        for r in &rows {
            let expected = if r[0] < 2.5 { a } else { b };
            assert_eq!(km.predict(r), expected);
        }
    }

    #[test]
    fn test_kmeans_is_deterministic() {
        let rows = two_blobs();
        let a = KMeans::fit(&rows, 2, 7).unwrap();
        let b = KMeans::fit(&rows, 2, 7).unwrap();
        assert_eq!(a.centroids(), b.centroids());
    }

    #[test]
    fn test_kmeans_rejects_too_few_rows() {
        let rows = vec![vec![1.0, 2.0]];
        assert!(KMeans::fit(&rows, 4, 42).is_err());
    }

    #[test]
    fn test_gmm_probabilities_sum_to_one() {
        let rows = two_blobs();
        let gmm = GaussianMixture::fit(&rows, 2, 42).unwrap();
        let p = gmm.predict_proba(&[0.1, 0.0]);
        assert_eq!(p.len(), 2);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(p.iter().any(|&x| x > 0.99), "point sits inside one blob: {p:?}");
    }
}
