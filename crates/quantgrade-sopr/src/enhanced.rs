//! Analyses of the observed `sopr` column: outlier-filtered aSOPR, the
//! short- and long-term holder views, and the profit/loss distribution.
//!
//! Holder views are derived from the aggregate series with fixed
//! multipliers until per-age UTXO data is available.

use quantgrade_core::error::QuantError;
use quantgrade_core::table::{Column, Table};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Gamma, LogNormal, Normal};
use std::collections::BTreeMap;
use std::fmt;

use crate::forecast::MarketScenario;
use crate::stats;

/// Rows required by the aSOPR and holder analyses.
pub const MIN_SERIES: usize = 30;
/// Rows required by the distribution model.
pub const MIN_DISTRIBUTION: usize = 50;
const PERCENTILES: [u32; 7] = [10, 25, 50, 75, 90, 95, 99];

const STH_MULTIPLIER: f64 = 1.2;
const LTH_DAMPENING: f64 = 0.7;

fn observed(data: &Table, step: &'static str, needed: usize) -> Result<Vec<f64>, QuantError> {
    if !data.has(Column::Sopr) {
        return Err(QuantError::MissingColumn("sopr"));
    }
    let series = data.finite(Column::Sopr);
    if series.len() < needed {
        return Err(QuantError::insufficient(step, needed, series.len()));
    }
    Ok(series)
}

fn tail_mean(series: &[f64], n: usize) -> f64 {
    stats::mean(stats::tail(series, n))
}

fn share(series: &[f64], keep: impl Fn(f64) -> bool) -> f64 {
    series.iter().filter(|&&x| keep(x)).count() as f64 / series.len().max(1) as f64
}

fn relative(a: f64, b: f64) -> f64 {
    if b != 0.0 {
        (a - b) / b
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePosition {
    LateBull,
    MidBull,
    Neutral,
    MidBear,
    LateBear,
}

impl CyclePosition {
    pub fn from_percentile(p: f64) -> Self {
        if p > 80.0 {
            Self::LateBull
        } else if p > 60.0 {
            Self::MidBull
        } else if p > 40.0 {
            Self::Neutral
        } else if p > 20.0 {
            Self::MidBear
        } else {
            Self::LateBear
        }
    }
}

impl fmt::Display for CyclePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LateBull => write!(f, "late_bull"),
            Self::MidBull => write!(f, "mid_bull"),
            Self::Neutral => write!(f, "neutral"),
            Self::MidBear => write!(f, "mid_bear"),
            Self::LateBear => write!(f, "late_bear"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustedSoprAnalysis {
    pub asopr_value: f64,
    pub asopr_7d_ma: f64,
    pub asopr_30d_ma: f64,
    pub z_score: f64,
    pub percentile: f64,
    pub signal: MarketScenario,
    pub outliers_removed: usize,
    pub outlier_threshold: f64,
    pub data_quality_score: f64,
    pub momentum: f64,
    pub volatility: f64,
    pub trend_strength: f64,
    pub cycle_position: CyclePosition,
}

/// aSOPR: the observed series with 1.5 x IQR outliers removed.
pub fn adjusted_sopr_analysis(data: &Table) -> Result<AdjustedSoprAnalysis, QuantError> {
    let raw = observed(data, "asopr", MIN_SERIES)?;
    let q1 = stats::percentile(&raw, 25.0);
    let q3 = stats::percentile(&raw, 75.0);
    let outlier_threshold = 1.5 * (q3 - q1);
    let (lower, upper) = (q1 - outlier_threshold, q3 + outlier_threshold);

    let kept: Vec<f64> = raw
        .iter()
        .copied()
        .filter(|x| (lower..=upper).contains(x))
        .collect();
    // Too few survivors: analyse the unfiltered series instead.
    let (series, outliers_removed) = if kept.len() < 10 {
        (raw.clone(), 0)
    } else {
        let removed = raw.len() - kept.len();
        (kept, removed)
    };

    let value = series[series.len() - 1];
    let ma7 = if series.len() >= 7 { tail_mean(&series, 7) } else { value };
    let ma30 = if series.len() >= 30 { tail_mean(&series, 30) } else { value };
    let sd = stats::sample_std(&series);
    let z_score = if sd > 0.0 {
        (value - stats::mean(&series)) / sd
    } else {
        0.0
    };
    let percentile = stats::percentile_of_score(&series, value);
    let signal = if value > 1.05 && z_score > 1.0 {
        MarketScenario::Bullish
    } else if value < 0.95 && z_score < -1.0 {
        MarketScenario::Bearish
    } else {
        MarketScenario::Neutral
    };
    let volatility = if series.len() >= 30 {
        stats::sample_std(stats::tail(&series, 30))
    } else {
        0.0
    };
    let trend_strength = if series.len() >= 20 {
        stats::linear_trend(stats::tail(&series, 20)).1.abs()
    } else {
        0.0
    };

    Ok(AdjustedSoprAnalysis {
        asopr_value: value,
        asopr_7d_ma: ma7,
        asopr_30d_ma: ma30,
        z_score,
        percentile,
        signal,
        outliers_removed,
        outlier_threshold,
        data_quality_score: 1.0 - outliers_removed as f64 / raw.len() as f64,
        momentum: relative(ma7, ma30),
        volatility,
        trend_strength,
        cycle_position: CyclePosition::from_percentile(percentile),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortTermImpact {
    StrongSellingPressure,
    ModerateSellingPressure,
    CapitulationRisk,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortTermHolderAnalysis {
    pub sopr: f64,
    pub sopr_ma: f64,
    pub profit_ratio: f64,
    pub loss_ratio: f64,
    pub realized_pnl: f64,
    pub behavioral_score: f64,
    pub market_impact: ShortTermImpact,
    /// Per age band, from `1d_7d` to `3m_5m`.
    pub age_bands: BTreeMap<String, f64>,
    pub profit_taking_intensity: f64,
    pub panic_selling_score: f64,
    pub momentum_following: f64,
    pub sentiment_alignment: f64,
}

/// Short-term holders amplify the aggregate reading by 1.2.
pub fn short_term_holder_analysis(data: &Table) -> Result<ShortTermHolderAnalysis, QuantError> {
    let series = observed(data, "sth_sopr", MIN_SERIES)?;
    let sopr = series[series.len() - 1] * STH_MULTIPLIER;
    let market_impact = if sopr > 1.1 {
        ShortTermImpact::StrongSellingPressure
    } else if sopr > 1.05 {
        ShortTermImpact::ModerateSellingPressure
    } else if sopr < 0.95 {
        ShortTermImpact::CapitulationRisk
    } else {
        ShortTermImpact::Neutral
    };
    let age_bands = [("1d_7d", 1.3), ("1w_1m", 1.15), ("1m_3m", 1.05), ("3m_5m", 0.98)]
        .into_iter()
        .map(|(band, factor)| (band.to_string(), sopr * factor))
        .collect();
    let volatility = stats::sample_std(stats::tail(&series, 30));
    let trend = relative(tail_mean(&series, 7), tail_mean(&series, 14));

    Ok(ShortTermHolderAnalysis {
        sopr,
        sopr_ma: tail_mean(&series, 14) * STH_MULTIPLIER,
        profit_ratio: share(&series, |x| x > 1.0),
        loss_ratio: share(&series, |x| x < 1.0),
        realized_pnl: (sopr - 1.0) * 1e6,
        behavioral_score: stats::clamp01((sopr - 0.8) / 0.4),
        market_impact,
        age_bands,
        profit_taking_intensity: (volatility * 5.0).min(1.0),
        panic_selling_score: ((1.0 - sopr) * 2.0).max(0.0),
        momentum_following: ((sopr - 1.0).abs() * 3.0).min(1.0),
        sentiment_alignment: stats::clamp01(0.5 + trend * 2.0),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LongTermImpact {
    MajorDistribution,
    ModerateDistribution,
    StrongAccumulation,
    Hodling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermHolderAnalysis {
    pub sopr: f64,
    pub sopr_ma: f64,
    pub profit_ratio: f64,
    pub loss_ratio: f64,
    pub realized_pnl: f64,
    pub behavioral_score: f64,
    pub market_impact: LongTermImpact,
    /// Per age band, from `6m_1y` to `4y_plus`.
    pub age_bands: BTreeMap<String, f64>,
    pub hodling_strength: f64,
    pub distribution_score: f64,
    pub accumulation_score: f64,
    pub cycle_timing_score: f64,
}

/// Long-term holders move 70% as far from breakeven as the aggregate.
pub fn long_term_holder_analysis(data: &Table) -> Result<LongTermHolderAnalysis, QuantError> {
    let series = observed(data, "lth_sopr", MIN_SERIES)?;
    let sopr = 1.0 + (series[series.len() - 1] - 1.0) * LTH_DAMPENING;
    let market_impact = if sopr > 1.2 {
        LongTermImpact::MajorDistribution
    } else if sopr > 1.1 {
        LongTermImpact::ModerateDistribution
    } else if sopr < 0.9 {
        LongTermImpact::StrongAccumulation
    } else {
        LongTermImpact::Hodling
    };
    let age_bands = [("6m_1y", 1.1), ("1y_2y", 1.05), ("2y_4y", 0.98), ("4y_plus", 0.95)]
        .into_iter()
        .map(|(band, factor)| (band.to_string(), sopr * factor))
        .collect();
    let volatility = if series.len() >= 90 {
        stats::sample_std(stats::tail(&series, 90))
    } else {
        0.05
    };
    let profit_ratio = (share(&series, |x| x > 1.0) * 1.2).min(0.9);
    let trend = relative(tail_mean(&series, 30), tail_mean(&series, 90));
    let cycle_timing_score = if sopr > 1.0 && trend > 0.0 {
        0.8
    } else if sopr < 1.0 && trend < 0.0 {
        0.9
    } else {
        0.5
    };

    Ok(LongTermHolderAnalysis {
        sopr,
        sopr_ma: tail_mean(&series, 90),
        profit_ratio,
        loss_ratio: 1.0 - profit_ratio,
        realized_pnl: (sopr - 1.0) * 5e6,
        behavioral_score: stats::clamp01((sopr - 0.9) / 0.2),
        market_impact,
        age_bands,
        hodling_strength: (1.0 - volatility * 10.0).max(0.0),
        distribution_score: ((sopr - 1.0) * 2.0).max(0.0),
        accumulation_score: ((1.0 - sopr) * 1.5).max(0.0),
        cycle_timing_score,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FittedDistribution {
    Normal,
    Lognormal,
    Gamma,
}

/// Moment summary of one side (profit or loss) of the distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideStatistics {
    pub mean: f64,
    pub std: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    /// `P10` .. `P99`.
    pub percentiles: BTreeMap<String, f64>,
}

impl SideStatistics {
    fn of(pcts: &[f64]) -> Self {
        let percentiles = PERCENTILES
            .iter()
            .map(|&p| (format!("P{p}"), stats::percentile(pcts, p as f64)))
            .collect();
        Self {
            mean: if pcts.is_empty() { 0.0 } else { stats::mean(pcts) },
            std: stats::sample_std(pcts),
            skewness: stats::skewness(pcts),
            kurtosis: stats::kurtosis(pcts),
            percentiles,
        }
    }

    fn p95(&self) -> f64 {
        self.percentiles.get("P95").copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitLossDistribution {
    pub profit: SideStatistics,
    pub loss: SideStatistics,
    pub profit_at_risk_95: f64,
    pub loss_at_risk_95: f64,
    pub expected_profit: f64,
    pub expected_loss: f64,
    pub best_fit_distribution: FittedDistribution,
    pub distribution_parameters: BTreeMap<String, f64>,
    /// `1 - KS statistic` of the best fit.
    pub goodness_of_fit: f64,
    pub tail_ratio: f64,
    pub extreme_profit_probability: f64,
    pub extreme_loss_probability: f64,
}

/// Kolmogorov-Smirnov statistic of `sorted` against `cdf`.
pub fn ks_statistic(sorted: &[f64], cdf: impl Fn(f64) -> f64) -> f64 {
    let n = sorted.len() as f64;
    sorted
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let f = cdf(x);
            ((i + 1) as f64 / n - f).max(f - i as f64 / n)
        })
        .fold(0.0, f64::max)
}

/// Moment-matched candidate fits, best (lowest KS) first.
pub fn fit_candidates(values: &[f64]) -> Vec<(FittedDistribution, BTreeMap<String, f64>, f64)> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mean = stats::mean(values);
    let sd = stats::sample_std(values);
    let mut fits = Vec::new();

    if let Ok(d) = Normal::new(mean, sd) {
        let params = BTreeMap::from([("mean".to_string(), mean), ("std".to_string(), sd)]);
        fits.push((FittedDistribution::Normal, params, ks_statistic(&sorted, |x| d.cdf(x))));
    }
    if values.iter().all(|&x| x > 0.0) {
        let logs: Vec<f64> = values.iter().map(|x| x.ln()).collect();
        let (mu, sigma) = (stats::mean(&logs), stats::sample_std(&logs));
        if let Ok(d) = LogNormal::new(mu, sigma) {
            let params = BTreeMap::from([("mu".to_string(), mu), ("sigma".to_string(), sigma)]);
            fits.push((FittedDistribution::Lognormal, params, ks_statistic(&sorted, |x| d.cdf(x))));
        }
        let var = sd * sd;
        if var > 0.0 {
            let (shape, rate) = (mean * mean / var, mean / var);
            if let Ok(d) = Gamma::new(shape, rate) {
                let params =
                    BTreeMap::from([("shape".to_string(), shape), ("rate".to_string(), rate)]);
                fits.push((FittedDistribution::Gamma, params, ks_statistic(&sorted, |x| d.cdf(x))));
            }
        }
    }
    fits.retain(|(_, _, ks)| ks.is_finite());
    fits.sort_by(|a, b| a.2.total_cmp(&b.2));
    fits
}

pub fn profit_loss_distribution(data: &Table) -> Result<ProfitLossDistribution, QuantError> {
    let series = observed(data, "profit_loss_distribution", MIN_DISTRIBUTION)?;
    let profit: Vec<f64> = series
        .iter()
        .filter(|&&x| x > 1.0)
        .map(|x| (x - 1.0) * 100.0)
        .collect();
    let loss: Vec<f64> = series
        .iter()
        .filter(|&&x| x < 1.0)
        .map(|x| (1.0 - x) * 100.0)
        .collect();
    let profit_stats = SideStatistics::of(&profit);
    let loss_stats = SideStatistics::of(&loss);

    let (best_fit_distribution, distribution_parameters, goodness_of_fit) = if profit.len() > 10 {
        fit_candidates(&profit)
            .into_iter()
            .next()
            .map(|(d, p, ks)| (d, p, 1.0 - ks))
            .unwrap_or((FittedDistribution::Normal, BTreeMap::new(), 0.0))
    } else {
        (FittedDistribution::Normal, BTreeMap::new(), 0.0)
    };

    let n = series.len() as f64;
    let (tail_ratio, extreme_profit_probability, extreme_loss_probability) =
        if !profit.is_empty() && !loss.is_empty() {
            let (pp95, lp95) = (profit_stats.p95(), loss_stats.p95());
            (
                if lp95 > 0.0 { pp95 / lp95 } else { 1.0 },
                profit.iter().filter(|&&p| p > pp95).count() as f64 / n,
                loss.iter().filter(|&&l| l > lp95).count() as f64 / n,
            )
        } else {
            (1.0, 0.0, 0.0)
        };

    Ok(ProfitLossDistribution {
        profit_at_risk_95: stats::percentile(&profit, 5.0),
        loss_at_risk_95: stats::percentile(&loss, 95.0),
        expected_profit: profit_stats.mean,
        expected_loss: loss_stats.mean,
        profit: profit_stats,
        loss: loss_stats,
        best_fit_distribution,
        distribution_parameters,
        goodness_of_fit,
        tail_ratio,
        extreme_profit_probability,
        extreme_loss_probability,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sopr_table(values: Vec<f64>) -> Table {
        Table::from_columns([(Column::Sopr, values)]).unwrap()
    }

    fn oscillating(n: usize) -> Vec<f64> {
        (0..n).map(|i| 1.0 + (i as f64 * 0.7).sin() * 0.04).collect()
    }

    #[test]
    fn test_missing_sopr_column_is_expected_error() {
        let table = Table::from_columns([(Column::Price, vec![1.0; 40])]).unwrap();
        let err = adjusted_sopr_analysis(&table).unwrap_err();
        assert!(err.is_expected());
        assert!(short_term_holder_analysis(&sopr_table(vec![1.0; 10])).is_err());
    }

    #[test]
    fn test_asopr_drops_outlier() {
        let mut values = oscillating(60);
        values[20] = 5.0;
        let a = adjusted_sopr_analysis(&sopr_table(values)).unwrap();
        assert_eq!(a.outliers_removed, 1);
        assert!((a.data_quality_score - (1.0 - 1.0 / 60.0)).abs() < 1e-12);
        assert!((0.0..=100.0).contains(&a.percentile));
    }

    #[test]
    fn test_asopr_bullish_on_breakout() {
        // Even spread over [0.9, 1.1] ending on the maximum.
        let values: Vec<f64> = (0..=40).map(|i| 0.9 + i as f64 * 0.005).collect();
        let a = adjusted_sopr_analysis(&sopr_table(values)).unwrap();
        assert_eq!(a.outliers_removed, 0);
        assert_eq!(a.signal, MarketScenario::Bullish);
        assert_eq!(a.cycle_position, CyclePosition::LateBull);
    }

    #[test]
    fn test_holder_views_scale_last_reading() {
        let mut values = oscillating(100);
        values.push(1.05);
        let table = sopr_table(values);
        let sth = short_term_holder_analysis(&table).unwrap();
        assert!((sth.sopr - 1.26).abs() < 1e-12);
        assert_eq!(sth.market_impact, ShortTermImpact::StrongSellingPressure);
        assert_eq!(sth.age_bands.len(), 4);
        let lth = long_term_holder_analysis(&table).unwrap();
        assert!((lth.sopr - 1.035).abs() < 1e-12);
        assert_eq!(lth.market_impact, LongTermImpact::Hodling);
        assert!((lth.profit_ratio + lth.loss_ratio - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ks_statistic_of_perfect_uniform() {
        let sorted: Vec<f64> = (1..=10).map(|i| i as f64 / 10.0).collect();
        let d = ks_statistic(&sorted, |x| x.clamp(0.0, 1.0));
        assert!((d - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_distribution_fit_and_tails() {
        let table = sopr_table(oscillating(200));
        let d = profit_loss_distribution(&table).unwrap();
        assert!(d.profit.mean > 0.0 && d.loss.mean > 0.0);
        assert_eq!(d.profit.percentiles.len(), 7);
        assert!((0.0..=1.0).contains(&d.goodness_of_fit));
        assert!(!d.distribution_parameters.is_empty());
        assert!(d.extreme_profit_probability < 0.05);
    }
}
