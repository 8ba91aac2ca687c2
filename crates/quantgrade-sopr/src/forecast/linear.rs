//! Ridge (closed form) and elastic-net (coordinate descent) regressors.
//!
//! Both fit an unpenalised intercept by centering the inputs.

use quantgrade_core::error::QuantError;

const ENET_MAX_ITER: usize = 1000;
const ENET_TOL: f64 = 1e-4;

fn column_means(x: &[Vec<f64>]) -> Vec<f64> {
    let dim = x.first().map_or(0, Vec::len);
    let n = x.len().max(1) as f64;
    (0..dim)
        .map(|d| x.iter().map(|r| r[d]).sum::<f64>() / n)
        .collect()
}

/// Solve `a * w = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, QuantError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            return Err(QuantError::Numerical("singular system in ridge solve".into()));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut w = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * w[k]).sum();
        w[row] = (b[row] - tail) / a[row][row];
    }
    Ok(w)
}

#[derive(Debug, Clone)]
pub struct LinearModel {
    coef: Vec<f64>,
    intercept: f64,
}

impl LinearModel {
    pub fn predict(&self, row: &[f64]) -> f64 {
        self.intercept + self.coef.iter().zip(row).map(|(w, x)| w * x).sum::<f64>()
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coef
    }

    /// Minimise `||y - Xw||^2 + alpha * ||w||^2`.
    pub fn ridge(x: &[Vec<f64>], y: &[f64], alpha: f64) -> Result<Self, QuantError> {
        if x.is_empty() || x.len() != y.len() {
            return Err(QuantError::Model("ridge needs matching non-empty x and y".into()));
        }
        let mx = column_means(x);
        let my = crate::stats::mean(y);
        let dim = mx.len();
        let mut a = vec![vec![0.0; dim]; dim];
        let mut b = vec![0.0; dim];
        for (row, target) in x.iter().zip(y) {
            for i in 0..dim {
                let xi = row[i] - mx[i];
                b[i] += xi * (target - my);
                for j in 0..dim {
                    a[i][j] += xi * (row[j] - mx[j]);
                }
            }
        }
        for (i, r) in a.iter_mut().enumerate() {
            r[i] += alpha.max(1e-10);
        }
        let coef = solve(a, b)?;
        let intercept = my - coef.iter().zip(&mx).map(|(w, m)| w * m).sum::<f64>();
        Ok(Self { coef, intercept })
    }

    /// Minimise `1/(2n) ||y - Xw||^2 + alpha * l1_ratio * ||w||_1
    /// + alpha * (1 - l1_ratio) / 2 * ||w||^2`.
    pub fn elastic_net(
        x: &[Vec<f64>],
        y: &[f64],
        alpha: f64,
        l1_ratio: f64,
    ) -> Result<Self, QuantError> {
        if x.is_empty() || x.len() != y.len() {
            return Err(QuantError::Model(
                "elastic net needs matching non-empty x and y".into(),
            ));
        }
        let n = x.len() as f64;
        let mx = column_means(x);
        let my = crate::stats::mean(y);
        let dim = mx.len();
        let xc: Vec<Vec<f64>> = x
            .iter()
            .map(|r| r.iter().zip(&mx).map(|(v, m)| v - m).collect())
            .collect();
        let yc: Vec<f64> = y.iter().map(|v| v - my).collect();
        let col_sq: Vec<f64> = (0..dim)
            .map(|d| xc.iter().map(|r| r[d] * r[d]).sum::<f64>() / n)
            .collect();

        let l1 = alpha * l1_ratio;
        let l2 = alpha * (1.0 - l1_ratio);
        let mut w = vec![0.0; dim];
        let mut residual = yc.clone();
        for _ in 0..ENET_MAX_ITER {
            let mut max_delta: f64 = 0.0;
            for d in 0..dim {
                if col_sq[d] <= 0.0 {
                    continue;
                }
                let rho = xc
                    .iter()
                    .zip(&residual)
                    .map(|(r, e)| r[d] * (e + r[d] * w[d]))
                    .sum::<f64>()
                    / n;
                let updated = soft_threshold(rho, l1) / (col_sq[d] + l2);
                let delta = updated - w[d];
                if delta != 0.0 {
                    for (e, r) in residual.iter_mut().zip(&xc) {
                        *e -= delta * r[d];
                    }
                    w[d] = updated;
                }
                max_delta = max_delta.max(delta.abs());
            }
            if max_delta < ENET_TOL {
                break;
            }
        }
        if w.iter().any(|v| !v.is_finite()) {
            return Err(QuantError::Numerical("elastic net diverged".into()));
        }
        let intercept = my - w.iter().zip(&mx).map(|(c, m)| c * m).sum::<f64>();
        Ok(Self { coef: w, intercept })
    }
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..50).map(|i| vec![i as f64 / 5.0, 1.0]).collect();
        let y: Vec<f64> = x.iter().map(|r| 3.0 * r[0] + 2.0).collect();
        (x, y)
    }

    #[test]
    fn test_ridge_recovers_line_with_small_alpha() {
        let (x, y) = line();
        let model = LinearModel::ridge(&x, &y, 1e-6).unwrap();
        assert!((model.coefficients()[0] - 3.0).abs() < 1e-4);
        assert!((model.predict(&[4.0, 1.0]) - 14.0).abs() < 1e-3);
    }

    #[test]
    fn test_ridge_shrinks_with_large_alpha() {
        let (x, y) = line();
        let small = LinearModel::ridge(&x, &y, 1e-6).unwrap();
        let large = LinearModel::ridge(&x, &y, 1e4).unwrap();
        assert!(large.coefficients()[0].abs() < small.coefficients()[0].abs());
    }

    #[test]
    fn test_elastic_net_zeroes_weak_signal() {
        let (x, y) = line();
        let model = LinearModel::elastic_net(&x, &y, 1000.0, 0.5).unwrap();
        assert_eq!(model.coefficients()[0], 0.0, "huge penalty kills the slope");
        assert!((model.predict(&[0.0, 1.0]) - crate::stats::mean(&y)).abs() < 1e-9);
    }

    #[test]
    fn test_elastic_net_tracks_slope_with_small_alpha() {
        let (x, y) = line();
        let model = LinearModel::elastic_net(&x, &y, 1e-4, 0.5).unwrap();
        assert!((model.coefficients()[0] - 3.0).abs() < 0.01);
    }
}
