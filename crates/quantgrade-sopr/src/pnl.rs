//! Portfolio-level realized and unrealized P&L across cohorts.

use quantgrade_core::cohort::CohortKind;
use quantgrade_core::error::QuantError;
use quantgrade_core::table::{Column, Table};
use serde::{Deserialize, Serialize};

use crate::cohort::{self, UtxoCohort};
use crate::{metrics, stats};

/// Average transaction size used to estimate transaction counts.
const AVG_TX_VALUE: f64 = 50_000.0;
/// Assumed cost basis as a share of the last price.
const COST_BASIS_SHARE: f64 = 0.8;
const VOLATILITY_WINDOW: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitLossAnalysis {
    pub total_realized_profit: f64,
    /// Absolute realized loss.
    pub total_realized_loss: f64,
    pub net_realized_pnl: f64,
    /// Profit over loss; `+inf` (serialized as `null`) when nothing was lost.
    pub profit_loss_ratio: f64,
    pub average_profit_per_tx: f64,
    pub average_loss_per_tx: f64,
    pub profit_taking_efficiency: f64,
    pub loss_cutting_discipline: f64,
    /// Placeholder estimate: assumes a cost basis of 80% of the last price.
    pub unrealized_pnl_estimate: f64,
    pub pnl_volatility: f64,
    pub risk_adjusted_return: f64,
}

impl Default for ProfitLossAnalysis {
    fn default() -> Self {
        Self {
            total_realized_profit: 0.0,
            total_realized_loss: 0.0,
            net_realized_pnl: 0.0,
            profit_loss_ratio: 1.0,
            average_profit_per_tx: 0.0,
            average_loss_per_tx: 0.0,
            profit_taking_efficiency: 0.5,
            loss_cutting_discipline: 0.5,
            unrealized_pnl_estimate: 0.0,
            pnl_volatility: 0.0,
            risk_adjusted_return: 0.0,
        }
    }
}

/// Long-term versus short-term profit ratio, halved and clamped.
fn profit_taking_efficiency(cohorts: &[UtxoCohort]) -> f64 {
    let lt = cohort::find(cohorts, CohortKind::LongTerm).map(|c| c.profit_ratio);
    let st = cohort::find(cohorts, CohortKind::ShortTerm).map(|c| c.profit_ratio);
    match (lt, st) {
        (Some(lt), Some(st)) if st > 0.0 => stats::clamp01(lt / st / 2.0),
        (Some(lt), _) => stats::clamp01(lt),
        _ => 0.5,
    }
}

fn unrealized_estimate(data: &Table, cohorts: &[UtxoCohort]) -> f64 {
    let Some(price) = data
        .column(Column::Price)
        .and_then(|p| p.iter().rev().copied().find(|x| x.is_finite() && *x > 0.0))
    else {
        return 0.0;
    };
    let cost_basis = price * COST_BASIS_SHARE;
    cohorts
        .iter()
        .map(|c| (price - cost_basis) * c.total_value / price)
        .sum()
}

pub fn analyze(data: &Table, cohorts: &[UtxoCohort]) -> Result<ProfitLossAnalysis, QuantError> {
    if cohorts.is_empty() {
        return Ok(ProfitLossAnalysis::default());
    }
    let profit: f64 = cohorts.iter().map(|c| c.realized_profit).sum();
    let loss: f64 = cohorts.iter().map(|c| c.realized_loss.abs()).sum();
    let value: f64 = cohorts.iter().map(|c| c.total_value).sum();
    if !(value > 0.0 && value.is_finite()) {
        return Err(QuantError::Numerical("total cohort value is not positive".into()));
    }
    let net = profit - loss;
    let tx_count = value / AVG_TX_VALUE;

    let pnl_volatility = if data.len() >= VOLATILITY_WINDOW && data.has(Column::Price) {
        stats::sample_std(&metrics::recent_price_changes(data, VOLATILITY_WINDOW)) * value
    } else {
        0.0
    };

    Ok(ProfitLossAnalysis {
        total_realized_profit: profit,
        total_realized_loss: loss,
        net_realized_pnl: net,
        profit_loss_ratio: if loss > 0.0 { profit / loss } else { f64::INFINITY },
        average_profit_per_tx: profit / tx_count,
        average_loss_per_tx: loss / tx_count,
        profit_taking_efficiency: profit_taking_efficiency(cohorts),
        loss_cutting_discipline: 1.0 - stats::clamp01(loss / value * 5.0),
        unrealized_pnl_estimate: unrealized_estimate(data, cohorts),
        pnl_volatility,
        risk_adjusted_return: if pnl_volatility > 0.0 {
            net / pnl_volatility
        } else {
            0.0
        },
    })
}
