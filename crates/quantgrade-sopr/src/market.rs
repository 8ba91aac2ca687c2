//! Market-level context around the SOPR series: microstructure proxies,
//! volatility modelling, distribution statistics, cross-correlations and
//! simple predictive indicators.

use quantgrade_core::error::QuantError;
use quantgrade_core::table::{Column, Table};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::collections::BTreeMap;
use std::fmt;

use crate::stats;

const FORECAST_STEPS: usize = 5;
const ROLLING_VOL_WINDOW: usize = 10;

/// Rows where every listed column is finite.
fn aligned(data: &Table, columns: &[Column]) -> Vec<Vec<f64>> {
    let mut out = vec![Vec::new(); columns.len()];
    for i in 0..data.len() {
        let row: Option<Vec<f64>> = columns.iter().map(|&c| data.value(c, i)).collect();
        if let Some(row) = row {
            for (col, v) in out.iter_mut().zip(row) {
                col.push(v);
            }
        }
    }
    out
}

fn observed_sopr(data: &Table, step: &'static str, needed: usize) -> Result<Vec<f64>, QuantError> {
    data.require(Column::Sopr)?;
    let series = data.finite(Column::Sopr);
    if series.len() < needed {
        return Err(QuantError::insufficient(step, needed, series.len()));
    }
    Ok(series)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicrostructureAnalysis {
    pub order_flow_imbalance: f64,
    pub bid_ask_pressure: f64,
    pub market_impact_score: f64,
    pub liquidity_stress_index: f64,
    pub price_discovery_efficiency: f64,
    pub transaction_cost: f64,
    pub market_depth_indicator: f64,
    pub volume_weighted_sopr: f64,
}

fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / total
    } else {
        stats::mean(values)
    }
}

/// Price/volume proxies for order flow and liquidity.
pub fn microstructure(data: &Table) -> Result<MicrostructureAnalysis, QuantError> {
    data.require(Column::Price)?;
    data.require(Column::Volume)?;
    let cols = aligned(data, &[Column::Price, Column::Volume]);
    let (prices, volumes) = (&cols[0], &cols[1]);
    if prices.len() < 3 {
        return Err(QuantError::insufficient("microstructure", 3, prices.len()));
    }
    let sopr: Vec<f64> = (0..data.len())
        .filter(|&i| data.value(Column::Price, i).is_some() && data.value(Column::Volume, i).is_some())
        .map(|i| data.value(Column::Sopr, i).unwrap_or(1.0))
        .collect();

    let price_changes = stats::diff(prices);
    let volume_changes = stats::diff(volumes);
    let mean_price = stats::mean(&prices[1..]);
    let price_volatility = if mean_price != 0.0 {
        stats::std(&price_changes) / mean_price
    } else {
        0.0
    };
    let vwap = weighted_mean(prices, volumes);
    let market_impact_score = if vwap > 0.0 {
        (prices[prices.len() - 1] - vwap).abs() / vwap
    } else {
        0.0
    };
    let mean_volume = stats::mean(volumes);
    let (liquidity_stress_index, market_depth_indicator) = if mean_volume > 0.0 {
        let volume_volatility = stats::std(volumes) / mean_volume;
        let (slope, _) = stats::linear_trend(volumes);
        (
            volume_volatility.min(2.0) / 2.0,
            stats::clamp01(slope / mean_volume + 0.5),
        )
    } else {
        (0.0, 0.5)
    };

    Ok(MicrostructureAnalysis {
        order_flow_imbalance: stats::correlation(&price_changes, &volume_changes),
        bid_ask_pressure: (price_volatility * 100.0).min(1.0),
        market_impact_score,
        liquidity_stress_index,
        price_discovery_efficiency: 1.0 - stats::autocorrelation(prices, 1).abs(),
        transaction_cost: price_volatility * 0.5,
        market_depth_indicator,
        volume_weighted_sopr: weighted_mean(&sopr, volumes),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityRegime {
    Low,
    Medium,
    High,
}

impl fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// GARCH(1,1) parameters `h_t = omega + alpha * r_{t-1}^2 + beta * h_{t-1}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GarchParameters {
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
    /// False when the grid search failed and fixed parameters were used.
    pub estimated: bool,
}

impl GarchParameters {
    fn fixed(variance: f64) -> Self {
        Self {
            omega: variance * 0.1,
            alpha: 0.1,
            beta: 0.8,
            estimated: false,
        }
    }

    pub fn persistence(&self) -> f64 {
        self.alpha + self.beta
    }

    /// Conditional variance path, starting from the sample variance.
    fn variances(&self, residuals: &[f64], start: f64) -> Vec<f64> {
        let mut h = Vec::with_capacity(residuals.len());
        let mut prev_h = start;
        let mut prev_r2 = start;
        for r in residuals {
            let next = self.omega + self.alpha * prev_r2 + self.beta * prev_h;
            h.push(next);
            prev_h = next;
            prev_r2 = r * r;
        }
        h
    }

    fn neg_log_likelihood(&self, residuals: &[f64], start: f64) -> f64 {
        self.variances(residuals, start)
            .iter()
            .zip(residuals)
            .map(|(h, r)| {
                if *h > 0.0 {
                    h.ln() + r * r / h
                } else {
                    f64::INFINITY
                }
            })
            .sum()
    }
}

/// Quasi-maximum-likelihood grid search with variance targeting:
/// `omega = var * (1 - alpha - beta)` so the unconditional variance matches
/// the sample.
pub fn fit_garch(returns: &[f64]) -> Option<GarchParameters> {
    let m = stats::mean(returns);
    let residuals: Vec<f64> = returns.iter().map(|r| r - m).collect();
    let var = stats::std(returns).powi(2);
    if !(var > 0.0) {
        return None;
    }
    let mut best: Option<(f64, GarchParameters)> = None;
    for a in 1..=15 {
        for b in 25..=49 {
            let (alpha, beta) = (a as f64 * 0.02, b as f64 * 0.02);
            if alpha + beta >= 0.999 {
                continue;
            }
            let params = GarchParameters {
                omega: var * (1.0 - alpha - beta),
                alpha,
                beta,
                estimated: true,
            };
            let nll = params.neg_log_likelihood(&residuals, var);
            if nll.is_finite() && best.as_ref().map_or(true, |(b, _)| nll < *b) {
                best = Some((nll, params));
            }
        }
    }
    best.map(|(_, p)| p)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityAnalysis {
    pub current_volatility: f64,
    /// Current volatility followed by five forecast steps.
    pub volatility_forecast: Vec<f64>,
    pub garch_parameters: GarchParameters,
    pub volatility_regime: VolatilityRegime,
    pub volatility_persistence: f64,
    pub volatility_clustering_score: f64,
    /// ARCH LM statistic with one lag and its chi-squared p-value.
    pub heteroskedasticity_test: BTreeMap<String, f64>,
}

fn arch_lm(returns: &[f64]) -> (f64, f64) {
    let squared: Vec<f64> = returns.iter().map(|r| r * r).collect();
    let r = stats::autocorrelation(&squared, 1);
    let statistic = (squared.len().saturating_sub(1)) as f64 * r * r;
    let p_value = ChiSquared::new(1.0)
        .map(|d| 1.0 - d.cdf(statistic))
        .unwrap_or(1.0);
    (statistic, p_value)
}

pub fn volatility(data: &Table) -> Result<VolatilityAnalysis, QuantError> {
    let series = observed_sopr(data, "volatility", 30)?;
    let returns: Vec<f64> = stats::log_returns(&series)
        .into_iter()
        .filter(|r| r.is_finite())
        .collect();
    if returns.len() < 20 {
        return Err(QuantError::insufficient("volatility", 20, returns.len()));
    }

    let current_volatility = stats::std(stats::tail(&returns, 30));
    let var = stats::std(&returns).powi(2);
    let (garch_parameters, volatility_forecast) = match fit_garch(&returns) {
        Some(p) => {
            let m = stats::mean(&returns);
            let residuals: Vec<f64> = returns.iter().map(|r| r - m).collect();
            let h = p.variances(&residuals, var);
            let last_h = h.last().copied().unwrap_or(var);
            let last_r = residuals.last().copied().unwrap_or(0.0);
            let mut next = p.omega + p.alpha * last_r * last_r + p.beta * last_h;
            let mut forecast = vec![current_volatility];
            for _ in 0..FORECAST_STEPS {
                forecast.push(next.max(0.0).sqrt());
                next = p.omega + p.persistence() * next;
            }
            (p, forecast)
        }
        None => (
            GarchParameters::fixed(var),
            vec![current_volatility; FORECAST_STEPS + 1],
        ),
    };

    let abs_returns: Vec<f64> = returns.iter().map(|r| r.abs()).collect();
    let rank = stats::percentile_of_score(&abs_returns, current_volatility);
    let volatility_regime = if rank > 80.0 {
        VolatilityRegime::High
    } else if rank < 20.0 {
        VolatilityRegime::Low
    } else {
        VolatilityRegime::Medium
    };
    let abs_changes = stats::diff(&abs_returns);
    let (statistic, p_value) = arch_lm(&returns);

    Ok(VolatilityAnalysis {
        current_volatility,
        volatility_forecast,
        garch_parameters,
        volatility_regime,
        volatility_persistence: stats::autocorrelation(&returns, 1).abs(),
        volatility_clustering_score: stats::autocorrelation(&abs_changes, 1),
        heteroskedasticity_test: BTreeMap::from([
            ("statistic".to_string(), statistic),
            ("p_value".to_string(), p_value),
        ]),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalMetrics {
    pub skewness: f64,
    pub kurtosis: f64,
    pub jarque_bera_stat: f64,
    pub jarque_bera_pvalue: f64,
    /// Lags 1 through `min(10, n / 4 - 1)`.
    pub autocorrelation: Vec<f64>,
}

/// Jarque-Bera statistic and its chi-squared(2) p-value.
pub fn jarque_bera(data: &[f64]) -> (f64, f64) {
    let n = data.len() as f64;
    let s = stats::skewness(data);
    let k = stats::kurtosis(data);
    let jb = n / 6.0 * (s * s + k * k / 4.0);
    let p = ChiSquared::new(2.0).map(|d| 1.0 - d.cdf(jb)).unwrap_or(1.0);
    (jb, p)
}

pub fn statistical_metrics(data: &Table) -> Result<StatisticalMetrics, QuantError> {
    let series = observed_sopr(data, "statistical_metrics", 10)?;
    let (jarque_bera_stat, jarque_bera_pvalue) = jarque_bera(&series);
    let max_lag = (series.len() / 4).min(11);
    Ok(StatisticalMetrics {
        skewness: stats::skewness(&series),
        kurtosis: stats::kurtosis(&series),
        jarque_bera_stat,
        jarque_bera_pvalue,
        autocorrelation: (1..max_lag)
            .map(|lag| stats::autocorrelation(&series, lag))
            .collect(),
    })
}

/// SOPR against price, volume and rolling 10-row price volatility.
pub fn correlations(data: &Table) -> Result<BTreeMap<String, f64>, QuantError> {
    data.require(Column::Sopr)?;
    let mut out = BTreeMap::new();
    for (column, key) in [
        (Column::Price, "price_correlation"),
        (Column::Volume, "volume_correlation"),
    ] {
        if data.has(column) {
            let cols = aligned(data, &[Column::Sopr, column]);
            if cols[0].len() > 1 {
                out.insert(key.to_string(), stats::correlation(&cols[0], &cols[1]));
            }
        }
    }
    if data.has(Column::Price) && data.len() > 30 {
        let cols = aligned(data, &[Column::Sopr, Column::Price]);
        let returns = stats::log_returns(&cols[1]);
        let rolling: Vec<f64> = returns
            .windows(ROLLING_VOL_WINDOW)
            .map(stats::sample_std)
            .collect();
        if rolling.len() > 1 && returns.len() + 1 == cols[1].len() {
            let sopr = stats::tail(&cols[0], rolling.len());
            out.insert(
                "volatility_correlation".to_string(),
                stats::correlation(sopr, &rolling),
            );
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveMetrics {
    pub trend_strength: f64,
    pub momentum_score: f64,
    pub mean_reversion_probability: f64,
    pub breakout_potential: f64,
    pub support_level: f64,
    pub resistance_level: f64,
}

pub fn predictive_metrics(data: &Table) -> Result<PredictiveMetrics, QuantError> {
    let series = observed_sopr(data, "predictive_metrics", 20)?;
    let n = series.len();
    let recent = stats::mean(&series[n - 5..]);
    let past = stats::mean(&series[n - 15..n - 10]);
    let momentum_score = if past != 0.0 { (recent - past) / past } else { 0.0 };

    let sd = stats::std(&series);
    let z = if sd > 0.0 {
        (series[n - 1] - stats::mean(&series)) / sd
    } else {
        0.0
    };
    let breakout_potential = if sd > 0.0 {
        stats::std(stats::tail(&series, 10)) / sd
    } else {
        1.0
    };

    Ok(PredictiveMetrics {
        trend_strength: stats::linear_trend(&series).1.abs(),
        momentum_score,
        mean_reversion_probability: 1.0 / (1.0 + (-z.abs()).exp()),
        breakout_potential,
        support_level: stats::percentile(&series, 25.0),
        resistance_level: stats::percentile(&series, 75.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market_table(n: usize) -> Table {
        let price: Vec<f64> = (0..n)
            .map(|i| 100.0 * (1.0 + (i as f64 * 0.2).sin() * 0.05 + i as f64 * 0.001))
            .collect();
        let volume: Vec<f64> = (0..n).map(|i| 1000.0 + (i as f64 * 0.5).cos() * 200.0).collect();
        let sopr: Vec<f64> = (0..n)
            .map(|i| 1.0 + (i as f64 * 0.3).sin() * 0.03 + (i as f64 * 1.9).cos() * 0.01)
            .collect();
        Table::from_columns([
            (Column::Price, price),
            (Column::Volume, volume),
            (Column::Sopr, sopr),
        ])
        .unwrap()
    }

    #[test]
    fn test_microstructure_bounds() {
        let m = microstructure(&market_table(120)).unwrap();
        assert!((-1.0..=1.0).contains(&m.order_flow_imbalance));
        assert!((0.0..=1.0).contains(&m.bid_ask_pressure));
        assert!((0.0..=1.0).contains(&m.liquidity_stress_index));
        assert!((0.0..=1.0).contains(&m.market_depth_indicator));
        assert!((m.volume_weighted_sopr - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_microstructure_needs_volume() {
        let table = Table::from_columns([(Column::Price, vec![1.0; 10])]).unwrap();
        assert!(matches!(
            microstructure(&table),
            Err(QuantError::MissingColumn("volume"))
        ));
    }

    #[test]
    fn test_garch_fit_is_stationary() {
        let returns: Vec<f64> = (0..300)
            .map(|i| {
                let burst = if (i / 50) % 2 == 0 { 0.01 } else { 0.04 };
                (i as f64 * 2.1).sin() * burst
            })
            .collect();
        let p = fit_garch(&returns).unwrap();
        assert!(p.estimated);
        assert!(p.persistence() < 1.0);
        assert!(p.omega > 0.0);
        assert!(fit_garch(&[0.0; 30]).is_none());
    }

    #[test]
    fn test_volatility_forecast_shape() {
        let v = volatility(&market_table(200)).unwrap();
        assert_eq!(v.volatility_forecast.len(), FORECAST_STEPS + 1);
        assert!(v.volatility_forecast.iter().all(|x| x.is_finite() && *x >= 0.0));
        let p = v.heteroskedasticity_test["p_value"];
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn test_jarque_bera_normal_like_data_is_not_rejected() {
        let (jb, p) = jarque_bera(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
        assert!(jb >= 0.0);
        assert!(p > 0.05, "uniform ramp p-value {p}");
    }

    #[test]
    fn test_statistical_metrics_lag_count() {
        let s = statistical_metrics(&market_table(100)).unwrap();
        assert_eq!(s.autocorrelation.len(), 10);
        let s = statistical_metrics(&market_table(20)).unwrap();
        assert_eq!(s.autocorrelation.len(), 4);
    }

    #[test]
    fn test_correlations_keys() {
        let c = correlations(&market_table(100)).unwrap();
        assert!(c.contains_key("price_correlation"));
        assert!(c.contains_key("volume_correlation"));
        assert!(c.contains_key("volatility_correlation"));
        assert!(c.values().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_predictive_levels_ordered() {
        let p = predictive_metrics(&market_table(60)).unwrap();
        assert!(p.support_level <= p.resistance_level);
        assert!((0.5..=1.0).contains(&p.mean_reversion_probability));
    }
}
