//! SOPR anomaly detection.
//!
//! A z-score check on the last 30 per-row SOPR readings, a hodling-break
//! check on the long-term cohort, and (with a fitted model) an isolation
//! forest check on the current feature vector.

use quantgrade_core::cohort::CohortKind;
use quantgrade_core::error::QuantError;
use quantgrade_core::table::Table;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::cohort::{self, UtxoCohort};
use crate::isolation::IsolationForest;
use crate::{metrics, stats};

/// Rows in the rolling SOPR window.
pub const ANOMALY_WINDOW: usize = 30;
const CRITICAL_SIGMA: f64 = 3.0;
const HODLING_BREAK_SCORE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    ExtremeProfitTaking,
    MassCapitulation,
    HodlingBreak,
    WhaleMovement,
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExtremeProfitTaking => write!(f, "extreme_profit_taking"),
            Self::MassCapitulation => write!(f, "mass_capitulation"),
            Self::HodlingBreak => write!(f, "hodling_break"),
            Self::WhaleMovement => write!(f, "whale_movement"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoprAnomaly {
    pub anomaly_score: f64,
    pub is_anomaly: bool,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub affected_cohorts: Vec<CohortKind>,
    pub potential_causes: Vec<String>,
    pub market_implications: Vec<String>,
    pub historical_precedents: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl SoprAnomaly {
    fn profit_taking(score: f64, severity: Severity) -> Self {
        Self {
            anomaly_score: score,
            is_anomaly: true,
            anomaly_type: AnomalyType::ExtremeProfitTaking,
            severity,
            affected_cohorts: vec![CohortKind::ShortTerm, CohortKind::MediumTerm],
            potential_causes: strings(&["Market euphoria", "Profit taking cascade"]),
            market_implications: strings(&[
                "Potential price correction",
                "Increased selling pressure",
            ]),
            historical_precedents: strings(&["2017 bull market peak", "2021 cycle top"]),
        }
    }

    fn capitulation(score: f64, severity: Severity) -> Self {
        Self {
            anomaly_score: score,
            is_anomaly: true,
            anomaly_type: AnomalyType::MassCapitulation,
            severity,
            affected_cohorts: vec![CohortKind::LongTerm, CohortKind::Whale],
            potential_causes: strings(&["Market panic", "Forced liquidations"]),
            market_implications: strings(&[
                "Potential bottom formation",
                "Oversold conditions",
            ]),
            historical_precedents: strings(&["2018 bear market bottom", "2020 COVID crash"]),
        }
    }

    fn hodling_break(behavioral_score: f64) -> Self {
        Self {
            anomaly_score: 1.0 - behavioral_score,
            is_anomaly: true,
            anomaly_type: AnomalyType::HodlingBreak,
            severity: Severity::Medium,
            affected_cohorts: vec![CohortKind::LongTerm],
            potential_causes: strings(&["Long-term holder distribution", "Profit taking"]),
            market_implications: strings(&["Increased supply", "Potential trend change"]),
            historical_precedents: strings(&["Major cycle transitions"]),
        }
    }

    fn whale_movement(score: f64, threshold: f64) -> Self {
        let severity = if score - threshold > 0.1 {
            Severity::Medium
        } else {
            Severity::Low
        };
        Self {
            anomaly_score: score,
            is_anomaly: true,
            anomaly_type: AnomalyType::WhaleMovement,
            severity,
            affected_cohorts: vec![CohortKind::Whale],
            potential_causes: strings(&[
                "Unusual combination of market features",
                "Large holder repositioning",
            ]),
            market_implications: strings(&["Possible volatility spike", "Liquidity shift"]),
            historical_precedents: strings(&["Exchange cold-wallet reshuffles"]),
        }
    }
}

/// Per-row SOPR readings of the last 30 rows.
pub fn recent_sopr(data: &Table) -> Vec<f64> {
    let start = data.len().saturating_sub(ANOMALY_WINDOW);
    (start..data.len())
        .map(|i| metrics::observed_row_sopr(data, i))
        .collect()
}

/// Z-score check of the latest reading against the rolling window.
pub fn statistical_anomaly(window: &[f64], threshold: f64) -> Option<SoprAnomaly> {
    let current = *window.last()?;
    let mean = stats::mean(window);
    let sigma = stats::std(window);
    if !(sigma > 0.0) {
        return None;
    }
    let z = (current - mean) / sigma;
    let severity = |z: f64| {
        if z.abs() > CRITICAL_SIGMA {
            Severity::Critical
        } else {
            Severity::High
        }
    };
    if z > threshold {
        Some(SoprAnomaly::profit_taking(z, severity(z)))
    } else if z < -threshold {
        Some(SoprAnomaly::capitulation(z.abs(), severity(z)))
    } else {
        None
    }
}

pub fn hodling_break(cohorts: &[UtxoCohort]) -> Option<SoprAnomaly> {
    cohort::find(cohorts, CohortKind::LongTerm)
        .filter(|c| c.behavioral_score < HODLING_BREAK_SCORE)
        .map(|c| SoprAnomaly::hodling_break(c.behavioral_score))
}

pub fn whale_movement(forest: &IsolationForest, scaled: &[f64]) -> Option<SoprAnomaly> {
    if scaled.iter().any(|x| !x.is_finite()) {
        return None;
    }
    let score = forest.score(scaled);
    (score > forest.threshold()).then(|| SoprAnomaly::whale_movement(score, forest.threshold()))
}

/// Run every check. `outlier` pairs a fitted forest with the scaled
/// current feature vector.
pub fn detect(
    data: &Table,
    cohorts: &[UtxoCohort],
    threshold: f64,
    outlier: Option<(&IsolationForest, &[f64])>,
) -> Result<Vec<SoprAnomaly>, QuantError> {
    if data.len() < ANOMALY_WINDOW {
        return Err(QuantError::insufficient("anomalies", ANOMALY_WINDOW, data.len()));
    }
    let mut anomalies = Vec::new();
    anomalies.extend(statistical_anomaly(&recent_sopr(data), threshold));
    anomalies.extend(hodling_break(cohorts));
    if let Some((forest, scaled)) = outlier {
        anomalies.extend(whale_movement(forest, scaled));
    }
    debug!("anomaly scan found {}", anomalies.len());
    Ok(anomalies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantgrade_core::table::Column;

    fn window_with_last(last: f64) -> Vec<f64> {
        let mut w: Vec<f64> = (0..29).map(|i| if i % 2 == 0 { 0.99 } else { 1.01 }).collect();
        w.push(last);
        w
    }

    #[test]
    fn test_flat_window_has_no_statistical_anomaly() {
        assert!(statistical_anomaly(&[1.0; 30], 2.5).is_none());
        assert!(statistical_anomaly(&[], 2.5).is_none());
    }

    #[test]
    fn test_spike_is_profit_taking() {
        let a = statistical_anomaly(&window_with_last(1.2), 2.5).unwrap();
        assert_eq!(a.anomaly_type, AnomalyType::ExtremeProfitTaking);
        assert_eq!(a.severity, Severity::Critical);
        assert!(a.anomaly_score > 3.0);
        assert_eq!(
            a.affected_cohorts,
            vec![CohortKind::ShortTerm, CohortKind::MediumTerm]
        );
    }

    #[test]
    fn test_drop_is_capitulation_with_positive_score() {
        let a = statistical_anomaly(&window_with_last(0.8), 2.5).unwrap();
        assert_eq!(a.anomaly_type, AnomalyType::MassCapitulation);
        assert!(a.anomaly_score > 0.0);
    }

    #[test]
    fn test_short_table_is_insufficient() {
        let table = Table::from_columns([(Column::Sopr, vec![1.0; 10])]).unwrap();
        let err = detect(&table, &[], 2.5, None).unwrap_err();
        assert!(err.is_expected());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert_eq!(Severity::Medium.to_string(), "medium");
    }
}
