//! Weighted SOPR risk score, mitigation hints and cohort stress tests.

use quantgrade_core::cohort::CohortKind;
use quantgrade_core::error::QuantError;
use quantgrade_core::table::{Column, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::behavior::BehavioralMetrics;
use crate::cohort::UtxoCohort;
use crate::stats;

const WEIGHT_PROFIT_TAKING: f64 = 0.25;
const WEIGHT_CAPITULATION: f64 = 0.25;
const WEIGHT_LIQUIDITY: f64 = 0.2;
const WEIGHT_SENTIMENT: f64 = 0.15;
const WEIGHT_CONCENTRATION: f64 = 0.15;

/// Fixed stress scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressScenario {
    #[serde(rename = "price_drop_20pct")]
    PriceDrop20,
    #[serde(rename = "price_rise_20pct")]
    PriceRise20,
    #[serde(rename = "price_drop_50pct")]
    PriceDrop50,
    #[serde(rename = "price_rise_100pct")]
    PriceRise100,
    LiquidityStress,
}

impl StressScenario {
    pub const PRICE_SHOCKS: [StressScenario; 4] = [
        StressScenario::PriceDrop20,
        StressScenario::PriceRise20,
        StressScenario::PriceDrop50,
        StressScenario::PriceRise100,
    ];

    /// Relative price move of a price-shock scenario.
    pub fn price_change(&self) -> Option<f64> {
        match self {
            Self::PriceDrop20 => Some(-0.2),
            Self::PriceRise20 => Some(0.2),
            Self::PriceDrop50 => Some(-0.5),
            Self::PriceRise100 => Some(1.0),
            Self::LiquidityStress => None,
        }
    }
}

impl fmt::Display for StressScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PriceDrop20 => write!(f, "price_drop_20pct"),
            Self::PriceRise20 => write!(f, "price_rise_20pct"),
            Self::PriceDrop50 => write!(f, "price_drop_50pct"),
            Self::PriceRise100 => write!(f, "price_rise_100pct"),
            Self::LiquidityStress => write!(f, "liquidity_stress"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoprRisk {
    pub overall_risk: f64,
    pub profit_taking_risk: f64,
    pub capitulation_risk: f64,
    pub liquidity_risk: f64,
    pub sentiment_risk: f64,
    pub cohort_concentration_risk: f64,
    pub risk_factors: BTreeMap<String, f64>,
    pub risk_mitigation: Vec<String>,
    pub stress_test_results: BTreeMap<StressScenario, f64>,
}

impl Default for SoprRisk {
    fn default() -> Self {
        Self {
            overall_risk: 0.5,
            profit_taking_risk: 0.5,
            capitulation_risk: 0.0,
            liquidity_risk: 0.5,
            sentiment_risk: 0.5,
            cohort_concentration_risk: 0.5,
            risk_factors: BTreeMap::new(),
            risk_mitigation: Vec::new(),
            stress_test_results: BTreeMap::new(),
        }
    }
}

fn total_value(cohorts: &[UtxoCohort]) -> f64 {
    cohorts.iter().map(|c| c.total_value).sum()
}

/// Aggregate realization rate, scaled by 5.
pub fn liquidity_risk(cohorts: &[UtxoCohort]) -> f64 {
    let value = total_value(cohorts);
    if !(value > 0.0) {
        return 0.5;
    }
    let realized: f64 = cohorts.iter().map(UtxoCohort::realized).sum();
    stats::clamp01(realized / value * 5.0)
}

/// Normalised Herfindahl index of cohort value shares.
pub fn concentration_risk(cohorts: &[UtxoCohort]) -> f64 {
    let value = total_value(cohorts);
    let n = cohorts.len();
    if n < 2 || !(value > 0.0) {
        return 0.5;
    }
    let hhi: f64 = cohorts.iter().map(|c| (c.total_value / value).powi(2)).sum();
    let floor = 1.0 / n as f64;
    stats::clamp01((hhi - floor) / (1.0 - floor))
}

pub fn mitigation(factors: &BTreeMap<String, f64>) -> Vec<String> {
    let rules: [(&str, [&str; 2]); 4] = [
        (
            "profit_taking",
            [
                "Monitor for profit-taking cascades",
                "Consider position sizing adjustments",
            ],
        ),
        (
            "capitulation",
            [
                "Prepare for potential buying opportunities",
                "Monitor long-term holder behavior",
            ],
        ),
        (
            "liquidity",
            ["Ensure adequate liquidity buffers", "Monitor exchange flows"],
        ),
        (
            "concentration",
            ["Diversify across cohorts", "Monitor whale movements"],
        ),
    ];
    rules
        .iter()
        .filter(|(key, _)| factors.get(*key).copied().unwrap_or(0.0) > 0.7)
        .flat_map(|(_, hints)| hints.iter().map(|h| h.to_string()))
        .collect()
}

/// Stressed SOPR after a relative price move, with short-term holders
/// reacting twice as hard and long-term holders half as hard.
pub fn price_shock(cohorts: &[UtxoCohort], change: f64) -> f64 {
    let value = total_value(cohorts);
    if !(value > 0.0) {
        return 1.0;
    }
    let response: f64 = cohorts
        .iter()
        .map(|c| {
            let factor = match c.kind {
                CohortKind::ShortTerm => 2.0,
                CohortKind::LongTerm => 0.5,
                _ => 1.0,
            };
            change * factor * c.total_value
        })
        .sum();
    (1.0 + response / value).max(0.1)
}

/// Realization share when realization rates rise by half.
pub fn liquidity_stress(cohorts: &[UtxoCohort]) -> f64 {
    let value = total_value(cohorts);
    if !(value > 0.0) {
        return 0.5;
    }
    let stressed: f64 = cohorts.iter().map(|c| 1.5 * c.realized()).sum();
    (stressed / value).min(1.0)
}

pub fn stress_tests(data: &Table, cohorts: &[UtxoCohort]) -> BTreeMap<StressScenario, f64> {
    let mut results = BTreeMap::new();
    let current_price = data
        .column(Column::Price)
        .and_then(|p| p.last().copied())
        .filter(|p| p.is_finite());
    if let Some(price) = current_price {
        for scenario in StressScenario::PRICE_SHOCKS {
            let stressed = match scenario.price_change() {
                Some(change) if price != 0.0 => price_shock(cohorts, change),
                _ => 1.0,
            };
            results.insert(scenario, stressed);
        }
    }
    results.insert(StressScenario::LiquidityStress, liquidity_stress(cohorts));
    results
}

pub fn assess(
    data: &Table,
    cohorts: &[UtxoCohort],
    behavior: &BehavioralMetrics,
) -> Result<SoprRisk, QuantError> {
    let profit_taking_risk = stats::clamp01(behavior.profit_taking_intensity);
    let capitulation_risk = stats::clamp01(behavior.capitulation_score);
    let liquidity_risk = liquidity_risk(cohorts);
    let sentiment_risk = stats::clamp01((behavior.sentiment_alignment - 0.5).abs() * 2.0);
    let cohort_concentration_risk = concentration_risk(cohorts);

    let overall_risk = profit_taking_risk * WEIGHT_PROFIT_TAKING
        + capitulation_risk * WEIGHT_CAPITULATION
        + liquidity_risk * WEIGHT_LIQUIDITY
        + sentiment_risk * WEIGHT_SENTIMENT
        + cohort_concentration_risk * WEIGHT_CONCENTRATION;
    if !overall_risk.is_finite() {
        return Err(QuantError::Numerical("overall risk is not finite".into()));
    }

    let risk_factors = BTreeMap::from([
        ("profit_taking".to_string(), profit_taking_risk),
        ("capitulation".to_string(), capitulation_risk),
        ("liquidity".to_string(), liquidity_risk),
        ("sentiment".to_string(), sentiment_risk),
        ("concentration".to_string(), cohort_concentration_risk),
    ]);

    Ok(SoprRisk {
        overall_risk: stats::clamp01(overall_risk),
        profit_taking_risk,
        capitulation_risk,
        liquidity_risk,
        sentiment_risk,
        cohort_concentration_risk,
        risk_mitigation: mitigation(&risk_factors),
        risk_factors,
        stress_test_results: stress_tests(data, cohorts),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::{build_cohorts, FixedCohortSource};
    use quantgrade_core::cohort::CohortFlows;

    fn cohorts(values: [f64; 5]) -> Vec<UtxoCohort> {
        let flows = CohortKind::ALL
            .iter()
            .zip(values)
            .map(|(&kind, total_value)| CohortFlows {
                kind,
                total_value,
                realized_profit: total_value * 0.04,
                realized_loss: -total_value * 0.02,
            })
            .collect();
        build_cohorts(&FixedCohortSource::new(flows), &Table::default()).unwrap()
    }

    #[test]
    fn test_equal_cohorts_have_no_concentration() {
        let c = cohorts([1.0, 1.0, 1.0, 1.0, 1.0]);
        assert!(concentration_risk(&c).abs() < 1e-12);
        let skewed = cohorts([100.0, 0.0, 0.0, 0.0, 0.0]);
        assert!((concentration_risk(&skewed) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_liquidity_risk_and_stress() {
        let c = cohorts([1.0, 1.0, 1.0, 1.0, 1.0]);
        assert!((liquidity_risk(&c) - 0.3).abs() < 1e-12);
        assert!((liquidity_stress(&c) - 0.09).abs() < 1e-12);
    }

    #[test]
    fn test_price_shock_weights_short_term_more() {
        let c = cohorts([1.0, 1.0, 1.0, 1.0, 1.0]);
        // Factors 2, 1, 0.5, 1, 1 average to 1.1.
        assert!((price_shock(&c, -0.2) - (1.0 - 0.22)).abs() < 1e-12);
        assert_eq!(price_shock(&c, -2.0), 0.1, "stressed SOPR is floored");
    }

    #[test]
    fn test_five_stress_scenarios_with_price() {
        let table = Table::from_columns([(Column::Price, vec![100.0, 101.0])]).unwrap();
        let results = stress_tests(&table, &cohorts([1.0; 5]));
        assert_eq!(results.len(), 5);
        assert!(results[&StressScenario::PriceRise100] > 1.0);
        let json = serde_json::to_value(&results).unwrap();
        assert!(json.get("price_drop_20pct").is_some());
        assert!(json.get("liquidity_stress").is_some());
    }

    #[test]
    fn test_assess_bounds_and_mitigation() {
        let behavior = BehavioralMetrics {
            profit_taking_intensity: 0.9,
            ..Default::default()
        };
        let risk = assess(&Table::default(), &cohorts([1.0; 5]), &behavior).unwrap();
        assert!((0.0..=1.0).contains(&risk.overall_risk));
        assert!(risk
            .risk_mitigation
            .contains(&"Monitor for profit-taking cascades".to_string()));
        assert_eq!(risk.stress_test_results.len(), 1, "no price column, liquidity only");
    }
}
