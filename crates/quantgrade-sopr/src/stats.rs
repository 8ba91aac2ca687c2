//! Descriptive-statistics helpers on `f64` slices.
//!
//! Moments and correlation come from `statrs`; the wrappers map empty or
//! degenerate input to neutral values instead of `NaN`. `std` is the
//! population deviation, `sample_std` divides by `n - 1`, percentiles
//! interpolate linearly between order statistics (statrs' quantile uses the
//! R-8 estimator), skewness and kurtosis are the biased moment estimators
//! (kurtosis in Fisher form, i.e. 0 for a normal distribution).

use statrs::statistics::{Data, Median, Statistics};

/// Clamp to `[0, 1]`, mapping `NaN` to 0.
pub fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    finite_or_zero(data.mean())
}

/// Population standard deviation.
pub fn std(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    finite_or_zero(data.population_std_dev())
}

/// Sample standard deviation (`n - 1` denominator).
pub fn sample_std(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    finite_or_zero(data.std_dev())
}

/// Sample variance (`n - 1` denominator).
pub fn sample_var(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    finite_or_zero(data.variance())
}

fn sorted(data: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = data.iter().copied().filter(|x| !x.is_nan()).collect();
    v.sort_by(f64::total_cmp);
    v
}

/// Percentile `q` in `[0, 100]` with linear interpolation.
pub fn percentile(data: &[f64], q: f64) -> f64 {
    let v = sorted(data);
    percentile_sorted(&v, q)
}

/// Percentile of already-sorted data.
pub fn percentile_sorted(v: &[f64], q: f64) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    let pos = (q.clamp(0.0, 100.0) / 100.0) * (v.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    v[lo] + (v[hi] - v[lo]) * frac
}

pub fn median(data: &[f64]) -> f64 {
    let v = sorted(data);
    if v.is_empty() {
        return 0.0;
    }
    Data::new(v).median()
}

/// Percentile rank of `score` within `data` (0..100), ties averaged.
pub fn percentile_of_score(data: &[f64], score: f64) -> f64 {
    if data.is_empty() {
        return 50.0;
    }
    let below = data.iter().filter(|&&x| x < score).count() as f64;
    let at_or_below = data.iter().filter(|&&x| x <= score).count() as f64;
    let ties_bump = if at_or_below > below { 1.0 } else { 0.0 };
    (below + at_or_below + ties_bump) * 50.0 / data.len() as f64
}

/// Relative changes `x[i] / x[i-1] - 1`, skipping non-finite results.
pub fn pct_change(data: &[f64]) -> Vec<f64> {
    data.windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .filter(|x| x.is_finite())
        .collect()
}

/// Log returns `ln(x[i] / x[i-1])` of strictly positive values.
pub fn log_returns(data: &[f64]) -> Vec<f64> {
    data.windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

/// First differences.
pub fn diff(data: &[f64]) -> Vec<f64> {
    data.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Pearson correlation, 0 when either side is constant.
pub fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let (sa, sb) = (a.population_std_dev(), b.population_std_dev());
    if !(sa > 0.0 && sb > 0.0) {
        return 0.0;
    }
    let r = a.population_covariance(b) / (sa * sb);
    if r.is_finite() {
        r.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Lag-`k` autocorrelation as the correlation of `x[..n-k]` with `x[k..]`.
pub fn autocorrelation(data: &[f64], lag: usize) -> f64 {
    if lag == 0 || data.len() <= lag + 1 {
        return 0.0;
    }
    correlation(&data[..data.len() - lag], &data[lag..])
}

/// Biased sample skewness.
pub fn skewness(data: &[f64]) -> f64 {
    let n = data.len();
    if n < 3 {
        return 0.0;
    }
    let m = mean(data);
    let m2 = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n as f64;
    if m2 <= 0.0 {
        return 0.0;
    }
    let m3 = data.iter().map(|x| (x - m).powi(3)).sum::<f64>() / n as f64;
    m3 / m2.powf(1.5)
}

/// Biased excess kurtosis.
pub fn kurtosis(data: &[f64]) -> f64 {
    let n = data.len();
    if n < 4 {
        return 0.0;
    }
    let m = mean(data);
    let m2 = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n as f64;
    if m2 <= 0.0 {
        return 0.0;
    }
    let m4 = data.iter().map(|x| (x - m).powi(4)).sum::<f64>() / n as f64;
    m4 / (m2 * m2) - 3.0
}

/// Slope and Pearson `r` of an ordinary least-squares line through
/// `(i, data[i])`.
pub fn linear_trend(data: &[f64]) -> (f64, f64) {
    let n = data.len();
    if n < 2 {
        return (0.0, 0.0);
    }
    let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let mx = mean(&x);
    let my = mean(data);
    let sxy: f64 = x.iter().zip(data).map(|(a, b)| (a - mx) * (b - my)).sum();
    let sxx: f64 = x.iter().map(|a| (a - mx).powi(2)).sum();
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    (slope, correlation(&x, data))
}

/// Last `n` elements (or the whole slice when shorter).
pub fn tail(data: &[f64], n: usize) -> &[f64] {
    &data[data.len().saturating_sub(n)..]
}
