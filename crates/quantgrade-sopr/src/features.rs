//! The 13-dimensional feature vector shared by the forecast ensemble, the
//! regime clusterer and the isolation forest.

use quantgrade_core::table::{Column, Table};
use quantgrade_core::traits::CohortDataSource;

use crate::behavior::{self, BehavioralMetrics};
use crate::cohort::{self, UtxoCohort};
use crate::degrade::StepLog;
use crate::metrics::{self, SoprMetrics};
use crate::stats;

pub const N_FEATURES: usize = 13;

pub const FEATURE_NAMES: [&str; N_FEATURES] = [
    "sopr_value",
    "adjusted_sopr",
    "total_profit",
    "total_loss",
    "avg_behavioral_score",
    "profit_taking_intensity",
    "loss_realization_rate",
    "hodling_strength",
    "euphoria_score",
    "capitulation_score",
    "price_momentum",
    "price_volatility",
    "volume_trend",
];

pub type FeatureVector = [f64; N_FEATURES];

/// Index of `price_momentum`.
pub const MOMENTUM: usize = 10;
/// Index of `price_volatility`.
pub const VOLATILITY: usize = 11;

/// Rows the market features look back over.
const MARKET_WINDOW: usize = 30;

/// Assemble the vector from already computed pipeline outputs.
///
/// Market features are zero when fewer than 30 rows are available or the
/// column is absent. Non-finite entries are replaced by zero.
pub fn feature_vector(
    data: &Table,
    sopr: &SoprMetrics,
    cohorts: &[UtxoCohort],
    behavior: &BehavioralMetrics,
) -> FeatureVector {
    let (total_profit, total_loss, avg_score) = if cohorts.is_empty() {
        (0.0, 0.0, 0.5)
    } else {
        let scores: Vec<f64> = cohorts.iter().map(|c| c.behavioral_score).collect();
        (
            cohorts.iter().map(|c| c.realized_profit).sum(),
            cohorts.iter().map(|c| c.realized_loss.abs()).sum(),
            stats::mean(&scores),
        )
    };

    let (momentum, volatility, volume_trend) = if data.len() >= MARKET_WINDOW {
        let recent = data.tail(MARKET_WINDOW);
        let price_changes = metrics::price_changes(&recent);
        let volume_changes = recent
            .column(Column::Volume)
            .map(stats::pct_change)
            .unwrap_or_default();
        (
            stats::mean(&price_changes),
            stats::sample_std(&price_changes),
            stats::mean(&volume_changes),
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    let mut v = [
        sopr.sopr_value,
        sopr.adjusted_sopr,
        total_profit,
        total_loss,
        avg_score,
        behavior.profit_taking_intensity,
        behavior.loss_realization_rate,
        behavior.hodling_strength,
        behavior.euphoria_score,
        behavior.capitulation_score,
        momentum,
        volatility,
        volume_trend,
    ];
    for x in v.iter_mut() {
        if !x.is_finite() {
            *x = 0.0;
        }
    }
    v
}

/// Compute the vector for a window from scratch. Step failures fall back to
/// their defaults silently; training windows are not reported individually.
pub fn window_features(data: &Table, source: &dyn CohortDataSource) -> FeatureVector {
    let mut log = StepLog::new();
    let sopr = metrics::calculate_sopr_metrics(data);
    let cohorts = log.recover("cohorts", cohort::build_cohorts(source, data), Vec::new);
    let behavior = behavior::score(data, &cohorts, &mut log);
    feature_vector(data, &sopr, &cohorts, &behavior)
}
