//! Kalman smoother for the SOPR series.
//!
//! Local linear trend model with state `[level, velocity]`, transition
//! `F = [[1, 1], [0, 1]]` and observation `H = [1, 0]`. Noise parameters are
//! refined by a few EM passes, then a Rauch-Tung-Striebel pass produces the
//! smoothed states. Plain f64 arithmetic; 2x2 matrices are `[f64; 4]` in
//! row-major order.

use quantgrade_core::error::QuantError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tracing::debug;

use crate::stats;

/// Below this many observations the series is passed through unchanged.
pub const MIN_OBSERVATIONS: usize = 10;

type Mat = [f64; 4];
type Vec2 = [f64; 2];

const IDENTITY: Mat = [1.0, 0.0, 0.0, 1.0];
const F: Mat = [1.0, 1.0, 0.0, 1.0];

fn mat_mul(a: &Mat, b: &Mat) -> Mat {
    [
        a[0] * b[0] + a[1] * b[2],
        a[0] * b[1] + a[1] * b[3],
        a[2] * b[0] + a[3] * b[2],
        a[2] * b[1] + a[3] * b[3],
    ]
}

fn transpose(a: &Mat) -> Mat {
    [a[0], a[2], a[1], a[3]]
}

fn mat_add(a: &Mat, b: &Mat) -> Mat {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2], a[3] + b[3]]
}

fn mat_sub(a: &Mat, b: &Mat) -> Mat {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2], a[3] - b[3]]
}

fn scale(a: &Mat, s: f64) -> Mat {
    [a[0] * s, a[1] * s, a[2] * s, a[3] * s]
}

fn inverse(a: &Mat) -> Option<Mat> {
    let det = a[0] * a[3] - a[1] * a[2];
    if det.abs() < 1e-300 || !det.is_finite() {
        return None;
    }
    Some([a[3] / det, -a[1] / det, -a[2] / det, a[0] / det])
}

fn mat_vec(a: &Mat, v: &Vec2) -> Vec2 {
    [a[0] * v[0] + a[1] * v[1], a[2] * v[0] + a[3] * v[1]]
}

fn outer(u: &Vec2, v: &Vec2) -> Mat {
    [u[0] * v[0], u[0] * v[1], u[1] * v[0], u[1] * v[1]]
}

/// F * P * F'
fn propagate(p: &Mat) -> Mat {
    mat_mul(&mat_mul(&F, p), &transpose(&F))
}

/// Local linear trend model parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalLinearTrend {
    /// Process noise covariance.
    pub q: Mat,
    /// Observation noise variance.
    pub r: f64,
    pub initial_mean: Vec2,
    pub initial_cov: Mat,
}

struct FilterPass {
    pred_mean: Vec<Vec2>,
    pred_cov: Vec<Mat>,
    mean: Vec<Vec2>,
    cov: Vec<Mat>,
    loglik: f64,
}

struct SmoothPass {
    mean: Vec<Vec2>,
    cov: Vec<Mat>,
    /// `pair[t]` is Cov(x_t, x_{t-1}); `pair[0]` is unused.
    pair: Vec<Mat>,
}

impl LocalLinearTrend {
    /// Initial guess scaled to the series variance.
    pub fn from_variance(first: f64, var: f64) -> Self {
        Self {
            q: scale(&IDENTITY, var * 0.01),
            r: var * 0.1,
            initial_mean: [first, 0.0],
            initial_cov: scale(&IDENTITY, var),
        }
    }

    fn filter(&self, y: &[f64]) -> Result<FilterPass, QuantError> {
        let n = y.len();
        let mut pass = FilterPass {
            pred_mean: Vec::with_capacity(n),
            pred_cov: Vec::with_capacity(n),
            mean: Vec::with_capacity(n),
            cov: Vec::with_capacity(n),
            loglik: 0.0,
        };
        for (t, &obs) in y.iter().enumerate() {
            let (x_pred, p_pred) = if t == 0 {
                (self.initial_mean, self.initial_cov)
            } else {
                (
                    mat_vec(&F, &pass.mean[t - 1]),
                    mat_add(&propagate(&pass.cov[t - 1]), &self.q),
                )
            };

            let innovation = obs - x_pred[0];
            let s = p_pred[0] + self.r;
            if !(s > 0.0) || !s.is_finite() {
                return Err(QuantError::Numerical(format!(
                    "innovation variance {s} at step {t}"
                )));
            }
            let k = [p_pred[0] / s, p_pred[2] / s];
            let x = [x_pred[0] + k[0] * innovation, x_pred[1] + k[1] * innovation];
            let p = [
                (1.0 - k[0]) * p_pred[0],
                (1.0 - k[0]) * p_pred[1],
                -k[1] * p_pred[0] + p_pred[2],
                -k[1] * p_pred[1] + p_pred[3],
            ];
            pass.loglik -= 0.5 * ((2.0 * PI * s).ln() + innovation * innovation / s);

            pass.pred_mean.push(x_pred);
            pass.pred_cov.push(p_pred);
            pass.mean.push(x);
            pass.cov.push(p);
        }
        Ok(pass)
    }

    fn smooth(&self, y: &[f64]) -> Result<(SmoothPass, f64), QuantError> {
        let f = self.filter(y)?;
        let n = y.len();
        let mut mean = f.mean.clone();
        let mut cov = f.cov.clone();
        let mut pair = vec![[0.0; 4]; n];
        for t in (0..n.saturating_sub(1)).rev() {
            let inv = inverse(&f.pred_cov[t + 1]).ok_or_else(|| {
                QuantError::Numerical(format!("singular predicted covariance at step {}", t + 1))
            })?;
            let gain = mat_mul(&mat_mul(&f.cov[t], &transpose(&F)), &inv);
            let dx = [
                mean[t + 1][0] - f.pred_mean[t + 1][0],
                mean[t + 1][1] - f.pred_mean[t + 1][1],
            ];
            let corr = mat_vec(&gain, &dx);
            mean[t] = [f.mean[t][0] + corr[0], f.mean[t][1] + corr[1]];
            let dp = mat_sub(&cov[t + 1], &f.pred_cov[t + 1]);
            cov[t] = mat_add(&f.cov[t], &mat_mul(&mat_mul(&gain, &dp), &transpose(&gain)));
            pair[t + 1] = mat_mul(&cov[t + 1], &transpose(&gain));
        }
        Ok((SmoothPass { mean, cov, pair }, f.loglik))
    }

    /// One EM update of Q, R and the initial state.
    fn em_step(&self, y: &[f64]) -> Result<Self, QuantError> {
        let (s, _) = self.smooth(y)?;
        let n = y.len();

        let r = y
            .iter()
            .zip(&s.mean)
            .zip(&s.cov)
            .map(|((obs, x), p)| (obs - x[0]).powi(2) + p[0])
            .sum::<f64>()
            / n as f64;

        let mut q = [0.0; 4];
        for t in 0..n - 1 {
            let fx = mat_vec(&F, &s.mean[t]);
            let err = [s.mean[t + 1][0] - fx[0], s.mean[t + 1][1] - fx[1]];
            let cross = mat_mul(&s.pair[t + 1], &transpose(&F));
            let term = mat_sub(
                &mat_add(
                    &mat_add(&outer(&err, &err), &propagate(&s.cov[t])),
                    &s.cov[t + 1],
                ),
                &mat_add(&cross, &transpose(&cross)),
            );
            q = mat_add(&q, &term);
        }
        let q = scale(&q, 1.0 / (n - 1) as f64);

        let next = Self {
            q,
            r,
            initial_mean: s.mean[0],
            initial_cov: s.cov[0],
        };
        if !next.is_finite() {
            return Err(QuantError::Numerical("EM produced non-finite parameters".into()));
        }
        Ok(next)
    }

    fn is_finite(&self) -> bool {
        self.q.iter().all(|x| x.is_finite())
            && self.r.is_finite()
            && self.initial_mean.iter().all(|x| x.is_finite())
            && self.initial_cov.iter().all(|x| x.is_finite())
    }
}

/// Lower and upper bound of one prediction band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KalmanAnalysis {
    pub filtered_values: Vec<f64>,
    pub prediction_intervals: BTreeMap<String, Band>,
    pub state_estimates: BTreeMap<String, Vec<f64>>,
    pub innovation_statistics: BTreeMap<String, f64>,
    pub model_likelihood: f64,
    pub trend_analysis: BTreeMap<String, f64>,
    /// False when the series was passed through unsmoothed.
    pub smoothed: bool,
}

impl KalmanAnalysis {
    /// The raw series with degenerate bands.
    pub fn passthrough(series: &[f64]) -> Self {
        Self {
            filtered_values: series.to_vec(),
            prediction_intervals: ["68%", "95%", "99%"]
                .into_iter()
                .map(|level| {
                    let band = Band {
                        lower: series.to_vec(),
                        upper: series.to_vec(),
                    };
                    (level.to_string(), band)
                })
                .collect(),
            state_estimates: BTreeMap::from([("level".to_string(), series.to_vec())]),
            innovation_statistics: BTreeMap::from([
                ("mean".to_string(), 0.0),
                ("std".to_string(), 0.1),
            ]),
            model_likelihood: -100.0,
            trend_analysis: BTreeMap::from([
                ("slope".to_string(), 0.0),
                ("acceleration".to_string(), 0.0),
            ]),
            smoothed: false,
        }
    }
}

/// Smoothing strategy for the SOPR series.
pub trait SoprSmoother: Send + Sync {
    fn name(&self) -> &str;
    fn smooth(&self, series: &[f64]) -> Result<KalmanAnalysis, QuantError>;
}

/// EM-tuned local linear trend smoother.
#[derive(Debug, Clone)]
pub struct KalmanSmoother {
    pub em_iterations: usize,
    pub max_observations: usize,
}

impl Default for KalmanSmoother {
    fn default() -> Self {
        Self {
            em_iterations: 5,
            max_observations: 500,
        }
    }
}

impl SoprSmoother for KalmanSmoother {
    fn name(&self) -> &str {
        "kalman"
    }

    fn smooth(&self, series: &[f64]) -> Result<KalmanAnalysis, QuantError> {
        if series.len() < MIN_OBSERVATIONS {
            return Ok(KalmanAnalysis::passthrough(series));
        }
        let y = stats::tail(series, self.max_observations);
        let var = stats::sample_var(y);
        if !(var > 1e-12) {
            debug!("kalman: flat series, passing through");
            return Ok(KalmanAnalysis::passthrough(y));
        }

        let mut model = LocalLinearTrend::from_variance(y[0], var);
        for _ in 0..self.em_iterations {
            model = model.em_step(y)?;
        }
        let (s, loglik) = model.smooth(y)?;
        if !loglik.is_finite() {
            return Err(QuantError::Numerical("kalman log-likelihood diverged".into()));
        }
        Ok(summarize(y, &s, loglik))
    }
}

/// Returns the series unchanged.
#[derive(Debug, Clone, Default)]
pub struct PassthroughSmoother;

impl SoprSmoother for PassthroughSmoother {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn smooth(&self, series: &[f64]) -> Result<KalmanAnalysis, QuantError> {
        Ok(KalmanAnalysis::passthrough(series))
    }
}

fn summarize(y: &[f64], s: &SmoothPass, loglik: f64) -> KalmanAnalysis {
    let level: Vec<f64> = s.mean.iter().map(|x| x[0]).collect();
    let velocity: Vec<f64> = s.mean.iter().map(|x| x[1]).collect();
    let level_var: Vec<f64> = s.cov.iter().map(|p| p[0].max(0.0)).collect();
    let velocity_var: Vec<f64> = s.cov.iter().map(|p| p[3].max(0.0)).collect();

    let prediction_intervals = [("68%", 1.0), ("95%", 2.0), ("99%", 3.0)]
        .into_iter()
        .map(|(label, k)| {
            let width: Vec<f64> = level_var.iter().map(|v| k * v.sqrt()).collect();
            let band = Band {
                lower: level.iter().zip(&width).map(|(l, w)| l - w).collect(),
                upper: level.iter().zip(&width).map(|(l, w)| l + w).collect(),
            };
            (label.to_string(), band)
        })
        .collect();

    let innovations: Vec<f64> = y.iter().zip(&level).map(|(o, l)| o - l).collect();
    let innovation_statistics = BTreeMap::from([
        ("mean".to_string(), stats::mean(&innovations)),
        ("std".to_string(), stats::std(&innovations)),
        ("skewness".to_string(), stats::skewness(&innovations)),
        ("kurtosis".to_string(), stats::kurtosis(&innovations)),
    ]);

    let slope = stats::mean(&velocity);
    let accel = stats::diff(&velocity);
    let flips: Vec<f64> = velocity
        .windows(2)
        .map(|w| {
            let changed = (w[1].signum() - w[0].signum()).abs() >= 0.1;
            if changed {
                0.0
            } else {
                1.0
            }
        })
        .collect();
    let trend_analysis = BTreeMap::from([
        ("slope".to_string(), slope),
        ("acceleration".to_string(), stats::mean(&accel)),
        (
            "trend_strength".to_string(),
            slope.abs() / (stats::std(&velocity) + 1e-8),
        ),
        ("regime_persistence".to_string(), stats::mean(&flips)),
    ]);

    KalmanAnalysis {
        filtered_values: level.clone(),
        prediction_intervals,
        state_estimates: BTreeMap::from([
            ("level".to_string(), level),
            ("velocity".to_string(), velocity),
            ("level_variance".to_string(), level_var),
            ("velocity_variance".to_string(), velocity_var),
        ]),
        innovation_statistics,
        model_likelihood: loglik,
        trend_analysis,
        smoothed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy_sopr(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let t = i as f64;
                1.0 + (t * 0.05).sin() * 0.05 + (t * 2.3).sin() * 0.02
            })
            .collect()
    }

    #[test]
    fn test_smoothed_variance_less_than_raw() {
        let raw = noisy_sopr(200);
        let result = KalmanSmoother::default().smooth(&raw).unwrap();
        assert!(result.smoothed);
        assert_eq!(result.filtered_values.len(), raw.len());

        let raw_diffs: Vec<f64> = raw.windows(2).map(|w| w[1] - w[0]).collect();
        let smooth_diffs: Vec<f64> = result
            .filtered_values
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect();
        let raw_var = stats::std(&raw_diffs).powi(2);
        let smooth_var = stats::std(&smooth_diffs).powi(2);
        assert!(
            smooth_var < raw_var,
            "Smoothed variance ({smooth_var:.6}) should be less than raw ({raw_var:.6})"
        );
    }

    #[test]
    fn test_trend_detection_on_linear_data() {
        let series: Vec<f64> = (0..100)
            .map(|i| 0.9 + i as f64 * 0.002 + (i as f64 * 1.7).sin() * 0.001)
            .collect();
        let result = KalmanSmoother::default().smooth(&series).unwrap();
        let slope = result.trend_analysis["slope"];
        assert!(slope > 0.0, "Slope should be positive for uptrend, got {slope}");
    }

    #[test]
    fn test_bands_nest_around_level() {
        let result = KalmanSmoother::default().smooth(&noisy_sopr(120)).unwrap();
        let b68 = &result.prediction_intervals["68%"];
        let b95 = &result.prediction_intervals["95%"];
        let b99 = &result.prediction_intervals["99%"];
        for (i, level) in result.filtered_values.iter().enumerate() {
            assert!(b99.lower[i] <= b95.lower[i] && b95.lower[i] <= b68.lower[i]);
            assert!(b68.lower[i] <= *level && *level <= b68.upper[i]);
            assert!(b68.upper[i] <= b95.upper[i] && b95.upper[i] <= b99.upper[i]);
        }
        assert!(result.model_likelihood.is_finite());
    }

    #[test]
    fn test_short_series_passes_through() {
        let series = vec![1.0, 1.1, 0.9];
        let result = KalmanSmoother::default().smooth(&series).unwrap();
        assert!(!result.smoothed);
        assert_eq!(result.filtered_values, series);
        assert_eq!(result.model_likelihood, -100.0);
        assert_eq!(result.prediction_intervals.len(), 3);
        for level in ["68%", "95%", "99%"] {
            let band = &result.prediction_intervals[level];
            assert_eq!(band.lower, series, "{level} lower");
            assert_eq!(band.upper, series, "{level} upper");
        }
    }

    #[test]
    fn test_flat_series_passes_through() {
        let result = KalmanSmoother::default().smooth(&[1.0; 40]).unwrap();
        assert!(!result.smoothed);
    }

    #[test]
    fn test_window_is_capped() {
        let smoother = KalmanSmoother {
            em_iterations: 1,
            max_observations: 50,
        };
        let result = smoother.smooth(&noisy_sopr(300)).unwrap();
        assert_eq!(result.filtered_values.len(), 50);
    }

    #[test]
    fn test_inverse_round_trips() {
        let a = [2.0, 1.0, 1.0, 3.0];
        let inv = inverse(&a).unwrap();
        let id = mat_mul(&a, &inv);
        for (x, e) in id.iter().zip(IDENTITY) {
            assert!((x - e).abs() < 1e-12);
        }
        assert!(inverse(&[1.0, 2.0, 2.0, 4.0]).is_none());
    }
}
