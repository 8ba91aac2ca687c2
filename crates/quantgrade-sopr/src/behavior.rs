//! Behavioral scorer: nine bounded scalars and a behavioral regime label.
//!
//! Each scalar is computed by its own fallible function; [`score`] maps
//! every failure to that scalar's neutral default through a [`StepLog`].

use quantgrade_core::cohort::CohortKind;
use quantgrade_core::error::QuantError;
use quantgrade_core::table::{Column, Table};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cohort::{self, UtxoCohort};
use crate::degrade::StepLog;
use crate::{metrics, stats};

/// Rows of the short price window used by the panic and euphoria checks.
const SHORT_WINDOW: usize = 7;
/// Rows of the long price window used by capitulation and sentiment.
const LONG_WINDOW: usize = 30;

/// Dominant holder behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehavioralRegime {
    Accumulation,
    Distribution,
    Capitulation,
    Neutral,
}

impl fmt::Display for BehavioralRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accumulation => write!(f, "accumulation"),
            Self::Distribution => write!(f, "distribution"),
            Self::Capitulation => write!(f, "capitulation"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Nine scalars in `[0, 1]` plus the argmax regime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralMetrics {
    pub profit_taking_intensity: f64,
    pub loss_realization_rate: f64,
    pub hodling_strength: f64,
    pub panic_selling_score: f64,
    pub euphoria_score: f64,
    pub capitulation_score: f64,
    pub accumulation_score: f64,
    /// Alias of `profit_taking_intensity`; kept as its own field so
    /// consumers can treat distribution as a first-class signal.
    pub distribution_score: f64,
    pub sentiment_alignment: f64,
    pub behavioral_regime: BehavioralRegime,
}

impl Default for BehavioralMetrics {
    fn default() -> Self {
        Self {
            profit_taking_intensity: 0.5,
            loss_realization_rate: 0.5,
            hodling_strength: 0.5,
            panic_selling_score: 0.0,
            euphoria_score: 0.0,
            capitulation_score: 0.0,
            accumulation_score: 0.5,
            distribution_score: 0.0,
            sentiment_alignment: 0.5,
            behavioral_regime: BehavioralRegime::Neutral,
        }
    }
}

impl BehavioralMetrics {
    /// Vector used by the behavioral mixture model:
    /// `[profit, loss, hodling, euphoria, capitulation, accumulation, distribution]`.
    pub fn cluster_features(&self) -> [f64; 7] {
        [
            self.profit_taking_intensity,
            self.loss_realization_rate,
            self.hodling_strength,
            self.euphoria_score,
            self.capitulation_score,
            self.accumulation_score,
            self.distribution_score,
        ]
    }
}

fn total_value(cohorts: &[UtxoCohort]) -> Result<f64, QuantError> {
    let total: f64 = cohorts.iter().map(|c| c.total_value).sum();
    if total > 0.0 && total.is_finite() {
        Ok(total)
    } else {
        Err(QuantError::Numerical("total cohort value is not positive".into()))
    }
}

fn long_term(cohorts: &[UtxoCohort]) -> Result<&UtxoCohort, QuantError> {
    cohort::find(cohorts, CohortKind::LongTerm)
        .ok_or_else(|| QuantError::Model("long_term cohort unavailable".into()))
}

/// Sum of price changes inside the last `rows` rows.
fn window_change(data: &Table, rows: usize, step: &'static str) -> Result<f64, QuantError> {
    data.require(Column::Price)?;
    if data.len() < rows {
        return Err(QuantError::insufficient(step, rows, data.len()));
    }
    Ok(metrics::recent_price_changes(data, rows).iter().sum())
}

pub fn profit_taking_intensity(cohorts: &[UtxoCohort]) -> Result<f64, QuantError> {
    let profit: f64 = cohorts.iter().map(|c| c.realized_profit).sum();
    Ok(stats::clamp01(profit / total_value(cohorts)? * 10.0))
}

pub fn loss_realization_rate(cohorts: &[UtxoCohort]) -> Result<f64, QuantError> {
    let loss: f64 = cohorts.iter().map(|c| c.realized_loss.abs()).sum();
    Ok(stats::clamp01(loss / total_value(cohorts)? * 10.0))
}

pub fn hodling_strength(cohorts: &[UtxoCohort]) -> Result<f64, QuantError> {
    let lt = long_term(cohorts)?;
    Ok(1.0 - stats::clamp01(lt.realization_rate() * 5.0))
}

pub fn panic_selling_score(data: &Table, loss_rate: f64) -> Result<f64, QuantError> {
    let change = window_change(data, SHORT_WINDOW, "panic_selling")?;
    if change < -0.1 && loss_rate > 0.7 {
        Ok(stats::clamp01(change.abs() * loss_rate * 2.0))
    } else {
        Ok(0.0)
    }
}

pub fn euphoria_score(data: &Table, intensity: f64) -> Result<f64, QuantError> {
    let change = window_change(data, SHORT_WINDOW, "euphoria")?;
    if change > 0.1 && intensity > 0.7 {
        Ok(stats::clamp01(change * intensity * 2.0))
    } else {
        Ok(0.0)
    }
}

/// Sum of the last `count` price changes.
fn trailing_change(data: &Table, count: usize, step: &'static str) -> Result<f64, QuantError> {
    data.require(Column::Price)?;
    if data.len() < count {
        return Err(QuantError::insufficient(step, count, data.len()));
    }
    Ok(stats::tail(&metrics::price_changes(data), count).iter().sum())
}

pub fn capitulation_score(data: &Table, cohorts: &[UtxoCohort]) -> Result<f64, QuantError> {
    let lt = long_term(cohorts)?;
    let decline = trailing_change(data, LONG_WINDOW, "capitulation")?;
    if lt.sopr_value < 0.95 && lt.loss_ratio > 0.6 && decline < -0.2 {
        Ok(stats::clamp01(decline.abs() * lt.loss_ratio))
    } else {
        Ok(0.0)
    }
}

pub fn accumulation_score(cohorts: &[UtxoCohort]) -> Result<f64, QuantError> {
    if cohorts.is_empty() {
        return Err(QuantError::Model("no cohorts".into()));
    }
    let rates: Vec<f64> = cohorts.iter().map(UtxoCohort::realization_rate).collect();
    Ok(1.0 - stats::clamp01(stats::mean(&rates) * 5.0))
}

pub fn sentiment_alignment(data: &Table) -> Result<f64, QuantError> {
    data.require(Column::Price)?;
    if data.len() < LONG_WINDOW {
        return Ok(0.5);
    }
    let changes = metrics::recent_price_changes(data, LONG_WINDOW);
    Ok(stats::clamp01(0.5 + 2.0 * stats::mean(&changes)))
}

/// Composite scores in tie-break order.
fn regime_scores(m: &BehavioralMetrics) -> [(BehavioralRegime, f64); 4] {
    [
        (
            BehavioralRegime::Accumulation,
            m.accumulation_score + 0.5 * m.hodling_strength,
        ),
        (
            BehavioralRegime::Distribution,
            m.profit_taking_intensity + 0.5 * m.euphoria_score,
        ),
        (
            BehavioralRegime::Capitulation,
            m.capitulation_score + 0.5 * m.panic_selling_score,
        ),
        (
            BehavioralRegime::Neutral,
            1.0 - m
                .profit_taking_intensity
                .max(m.loss_realization_rate)
                .max(m.capitulation_score),
        ),
    ]
}

/// Argmax of the composite scores; the first maximum wins.
pub fn classify(m: &BehavioralMetrics) -> BehavioralRegime {
    let scores = regime_scores(m);
    let mut best = scores[0];
    for candidate in &scores[1..] {
        if candidate.1 > best.1 {
            best = *candidate;
        }
    }
    best.0
}

/// Compute all nine scalars and the regime, substituting defaults per scalar.
pub fn score(data: &Table, cohorts: &[UtxoCohort], log: &mut StepLog) -> BehavioralMetrics {
    let d = BehavioralMetrics::default();
    let intensity = log.recover(
        "profit_taking_intensity",
        profit_taking_intensity(cohorts),
        || d.profit_taking_intensity,
    );
    let loss_rate = log.recover(
        "loss_realization_rate",
        loss_realization_rate(cohorts),
        || d.loss_realization_rate,
    );
    let mut metrics = BehavioralMetrics {
        profit_taking_intensity: intensity,
        loss_realization_rate: loss_rate,
        hodling_strength: log.recover("hodling_strength", hodling_strength(cohorts), || {
            d.hodling_strength
        }),
        panic_selling_score: log.recover(
            "panic_selling_score",
            panic_selling_score(data, loss_rate),
            || d.panic_selling_score,
        ),
        euphoria_score: log.recover("euphoria_score", euphoria_score(data, intensity), || {
            d.euphoria_score
        }),
        capitulation_score: log.recover(
            "capitulation_score",
            capitulation_score(data, cohorts),
            || d.capitulation_score,
        ),
        accumulation_score: log.recover(
            "accumulation_score",
            accumulation_score(cohorts),
            || d.accumulation_score,
        ),
        distribution_score: intensity,
        sentiment_alignment: log.recover(
            "sentiment_alignment",
            sentiment_alignment(data),
            || d.sentiment_alignment,
        ),
        behavioral_regime: BehavioralRegime::Neutral,
    };
    metrics.behavioral_regime = classify(&metrics);
    metrics
}
