//! Monte Carlo SOPR path simulation.
//!
//! Geometric random walk on log-SOPR with drift and volatility estimated
//! from the observed series. Every call reseeds its own generator, so the
//! same input always yields the same paths.

use quantgrade_core::error::QuantError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::stats;

pub const MIN_OBSERVATIONS: usize = 20;
pub const MAX_SIMULATIONS: usize = 5000;
const MAX_HORIZON: usize = 30;
const PATH_FLOOR: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub probability: f64,
    pub expected_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressOutcome {
    pub impact: f64,
    pub probability: f64,
    pub description: String,
}

impl StressOutcome {
    fn new(impact: f64, probability: f64, description: &str) -> Self {
        Self {
            impact,
            probability,
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRiskMetrics {
    pub var: BTreeMap<String, f64>,
    pub cvar: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_drawdown: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upside_potential: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloAnalysis {
    pub historical_statistics: BTreeMap<String, f64>,
    /// Keyed by quantity (`sopr`, `returns`), then by level (`95%`).
    pub confidence_intervals: BTreeMap<String, BTreeMap<String, (f64, f64)>>,
    pub risk_metrics: PathRiskMetrics,
    pub scenario_probabilities: BTreeMap<String, ScenarioOutcome>,
    pub stress_test_results: BTreeMap<String, StressOutcome>,
    /// False for the canned short-history result.
    pub simulated: bool,
}

impl MonteCarloAnalysis {
    pub fn fallback() -> Self {
        let outcome = |probability| ScenarioOutcome {
            probability,
            expected_return: 0.0,
        };
        Self {
            historical_statistics: BTreeMap::from([
                ("mean".to_string(), 1.0),
                ("std".to_string(), 0.1),
                ("skewness".to_string(), 0.0),
                ("kurtosis".to_string(), 0.0),
            ]),
            confidence_intervals: BTreeMap::from([(
                "sopr".to_string(),
                BTreeMap::from([("95%".to_string(), (0.9, 1.1))]),
            )]),
            risk_metrics: PathRiskMetrics {
                var: BTreeMap::from([("95%".to_string(), 0.1)]),
                cvar: BTreeMap::from([("95%".to_string(), 0.15)]),
                maximum_drawdown: None,
                upside_potential: None,
            },
            scenario_probabilities: BTreeMap::from([
                ("bull".to_string(), outcome(0.33)),
                ("bear".to_string(), outcome(0.33)),
                ("neutral".to_string(), outcome(0.34)),
            ]),
            stress_test_results: BTreeMap::from([(
                "extreme_volatility".to_string(),
                StressOutcome::new(0.2, 0.05, "Triple historical volatility scenario"),
            )]),
            simulated: false,
        }
    }
}

/// Path simulation strategy for the SOPR series.
pub trait PathSimulator: Send + Sync {
    fn name(&self) -> &str;
    fn simulate(&self, series: &[f64]) -> Result<MonteCarloAnalysis, QuantError>;
}

/// Log-normal random walk simulator.
#[derive(Debug, Clone)]
pub struct GbmSimulator {
    pub simulations: usize,
    pub seed: u64,
}

impl Default for GbmSimulator {
    fn default() -> Self {
        Self {
            simulations: 1000,
            seed: 42,
        }
    }
}

/// Final values of each simulated path.
fn final_values(
    start: f64,
    drift: f64,
    vol: f64,
    paths: usize,
    horizon: usize,
    seed: u64,
) -> Result<Vec<f64>, QuantError> {
    let shock = Normal::new(drift, vol)
        .map_err(|e| QuantError::Numerical(format!("shock distribution: {e}")))?;
    let mut rng = StdRng::seed_from_u64(seed);
    Ok((0..paths)
        .map(|_| {
            let mut value = start;
            for _ in 0..horizon {
                value *= shock.sample(&mut rng).exp();
            }
            value.max(PATH_FLOOR)
        })
        .collect())
}

fn interval(values: &[f64], level: f64) -> (f64, f64) {
    let tail = (100.0 - level) / 2.0;
    (
        stats::percentile(values, tail),
        stats::percentile(values, 100.0 - tail),
    )
}

fn tail_mean(values: &[f64], cutoff: f64) -> f64 {
    let tail: Vec<f64> = values.iter().copied().filter(|v| *v <= cutoff).collect();
    stats::mean(&tail)
}

fn mean_where(returns: &[f64], finals: &[f64], keep: impl Fn(f64) -> bool) -> (f64, f64) {
    let picked: Vec<f64> = returns
        .iter()
        .zip(finals)
        .filter(|(_, f)| keep(**f))
        .map(|(r, _)| *r)
        .collect();
    let probability = picked.len() as f64 / finals.len().max(1) as f64;
    let expected = if picked.is_empty() {
        0.0
    } else {
        stats::mean(&picked)
    };
    (probability, expected)
}

fn stress_scenarios(series: &[f64], finals: &[f64], current: f64) -> BTreeMap<String, StressOutcome> {
    let log_returns: Vec<f64> = series.iter().map(|v| (v + 1e-8).ln()).collect();
    let historical_vol = stats::std(&stats::diff(&log_returns));
    BTreeMap::from([
        (
            "extreme_volatility".to_string(),
            StressOutcome::new(
                3.0 * historical_vol,
                0.05,
                "Triple historical volatility scenario",
            ),
        ),
        (
            "market_crash".to_string(),
            StressOutcome::new(-0.5, 0.02, "50% SOPR decline scenario"),
        ),
        (
            "euphoria_bubble".to_string(),
            StressOutcome::new(1.0, 0.03, "100% SOPR increase scenario"),
        ),
        (
            "liquidity_crisis".to_string(),
            StressOutcome::new(
                stats::std(finals) * 1.5 / current,
                0.08,
                "Increased correlation with market stress",
            ),
        ),
        (
            "regime_change".to_string(),
            StressOutcome::new(
                stats::percentile(finals, 10.0) / current - 1.0,
                0.15,
                "Structural market regime shift",
            ),
        ),
    ])
}

impl PathSimulator for GbmSimulator {
    fn name(&self) -> &str {
        "monte_carlo"
    }

    fn simulate(&self, series: &[f64]) -> Result<MonteCarloAnalysis, QuantError> {
        if series.len() < MIN_OBSERVATIONS {
            return Ok(MonteCarloAnalysis::fallback());
        }
        let current = series[series.len() - 1];
        if !(current > 0.0) {
            return Err(QuantError::Numerical(format!("current SOPR {current}")));
        }

        let hist_mean = stats::mean(series);
        let hist_std = stats::sample_std(series);
        let historical_statistics = BTreeMap::from([
            ("mean".to_string(), hist_mean),
            ("std".to_string(), hist_std),
            ("skewness".to_string(), stats::skewness(series)),
            ("kurtosis".to_string(), stats::kurtosis(series)),
            ("min".to_string(), series.iter().copied().fold(f64::INFINITY, f64::min)),
            ("max".to_string(), series.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            ("median".to_string(), stats::median(series)),
        ]);

        let log_sopr: Vec<f64> = series.iter().map(|v| (v + 1e-8).ln()).collect();
        let returns = stats::diff(&log_sopr);
        let drift = stats::mean(&returns);
        let vol = stats::sample_std(&returns);
        if !drift.is_finite() || !vol.is_finite() {
            return Err(QuantError::Numerical("non-finite log-SOPR returns".into()));
        }

        let paths = self.simulations.clamp(1, MAX_SIMULATIONS);
        let horizon = MAX_HORIZON.min(series.len() / 4);
        debug!("monte carlo: {paths} paths over {horizon} steps");
        let finals = final_values(current, drift, vol, paths, horizon, self.seed)?;
        let sim_returns: Vec<f64> = finals.iter().map(|f| (f - current) / current).collect();

        let sopr_intervals = [68.0, 95.0, 99.0]
            .into_iter()
            .map(|level| (format!("{level}%"), interval(&finals, level)))
            .collect();
        let confidence_intervals = BTreeMap::from([
            ("sopr".to_string(), sopr_intervals),
            (
                "returns".to_string(),
                BTreeMap::from([("95%".to_string(), interval(&returns, 95.0))]),
            ),
        ]);

        let var95 = stats::percentile(&sim_returns, 5.0);
        let var99 = stats::percentile(&sim_returns, 1.0);
        let risk_metrics = PathRiskMetrics {
            var: BTreeMap::from([("95%".to_string(), var95), ("99%".to_string(), var99)]),
            cvar: BTreeMap::from([
                ("95%".to_string(), tail_mean(&sim_returns, var95)),
                ("99%".to_string(), tail_mean(&sim_returns, var99)),
            ]),
            maximum_drawdown: Some(sim_returns.iter().copied().fold(f64::INFINITY, f64::min)),
            upside_potential: Some(stats::percentile(&sim_returns, 95.0)),
        };

        let bull_line = hist_mean + 0.5 * hist_std;
        let bear_line = hist_mean - 0.5 * hist_std;
        let (bull_p, bull_r) = mean_where(&sim_returns, &finals, |f| f > bull_line);
        let (bear_p, bear_r) = mean_where(&sim_returns, &finals, |f| f < bear_line);
        let (_, neutral_r) =
            mean_where(&sim_returns, &finals, |f| f >= bear_line && f <= bull_line);
        let scenario_probabilities = BTreeMap::from([
            (
                "bull".to_string(),
                ScenarioOutcome {
                    probability: bull_p,
                    expected_return: bull_r,
                },
            ),
            (
                "bear".to_string(),
                ScenarioOutcome {
                    probability: bear_p,
                    expected_return: bear_r,
                },
            ),
            (
                "neutral".to_string(),
                ScenarioOutcome {
                    probability: 1.0 - bull_p - bear_p,
                    expected_return: neutral_r,
                },
            ),
        ]);

        Ok(MonteCarloAnalysis {
            historical_statistics,
            confidence_intervals,
            risk_metrics,
            scenario_probabilities,
            stress_test_results: stress_scenarios(series, &finals, current),
            simulated: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 1.0 + (i as f64 * 0.4).sin() * 0.03 + i as f64 * 0.0005)
            .collect()
    }

    #[test]
    fn test_confidence_intervals_nest() {
        let result = GbmSimulator::default().simulate(&series(200)).unwrap();
        assert!(result.simulated);
        let sopr = &result.confidence_intervals["sopr"];
        let (l68, h68) = sopr["68%"];
        let (l95, h95) = sopr["95%"];
        let (l99, h99) = sopr["99%"];
        assert!(l99 < l95 && l95 < l68, "lower bounds {l99} {l95} {l68}");
        assert!(h68 < h95 && h95 < h99, "upper bounds {h68} {h95} {h99}");
        assert!(l68 < h68, "68% band collapsed: {l68} {h68}");
        assert!(l99 >= PATH_FLOOR);
    }

    #[test]
    fn test_same_seed_same_paths() {
        let sim = GbmSimulator {
            simulations: 300,
            seed: 7,
        };
        let a = sim.simulate(&series(100)).unwrap();
        let b = sim.simulate(&series(100)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_tail_risk_ordering_and_probabilities() {
        let result = GbmSimulator::default().simulate(&series(200)).unwrap();
        let var95 = result.risk_metrics.var["95%"];
        let var99 = result.risk_metrics.var["99%"];
        assert!(var99 <= var95);
        assert!(result.risk_metrics.cvar["95%"] <= var95);
        let total: f64 = result
            .scenario_probabilities
            .values()
            .map(|s| s.probability)
            .sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(result.stress_test_results.len(), 5);
        assert_eq!(result.stress_test_results["market_crash"].impact, -0.5);
    }

    #[test]
    fn test_short_history_uses_fallback() {
        let result = GbmSimulator::default().simulate(&series(10)).unwrap();
        assert_eq!(result, MonteCarloAnalysis::fallback());
        assert_eq!(result.scenario_probabilities["neutral"].probability, 0.34);
    }

    #[test]
    fn test_simulation_count_is_capped() {
        let sim = GbmSimulator {
            simulations: 1_000_000,
            seed: 42,
        };
        let result = sim.simulate(&series(40)).unwrap();
        assert!(result.simulated);
    }
}
