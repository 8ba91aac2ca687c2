//! Point SOPR and the 7-row adjusted SOPR.
//!
//! A row's SOPR is `realized_price / spent_price` when both columns exist,
//! otherwise `price / cost_basis`, otherwise breakeven (1.0). A zero,
//! negative or non-finite denominator also yields breakeven.

use quantgrade_core::table::{Column, Table};
use serde::{Deserialize, Serialize};

use crate::stats;

/// Rows averaged by the adjusted SOPR.
pub const ADJUSTED_WINDOW: usize = 7;

/// Point and smoothed SOPR of the most recent rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoprMetrics {
    pub sopr_value: f64,
    pub adjusted_sopr: f64,
}

impl Default for SoprMetrics {
    fn default() -> Self {
        Self {
            sopr_value: 1.0,
            adjusted_sopr: 1.0,
        }
    }
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d > 0.0 => Some(n / d).filter(|r| r.is_finite()),
        _ => None,
    }
}

/// SOPR of row `i` from the column pairs, `None` when no pair is usable.
fn pair_sopr(data: &Table, i: usize) -> Option<f64> {
    if data.has(Column::RealizedPrice) && data.has(Column::SpentPrice) {
        return ratio(
            data.value(Column::RealizedPrice, i),
            data.value(Column::SpentPrice, i),
        );
    }
    if data.has(Column::Price) && data.has(Column::CostBasis) {
        return ratio(data.value(Column::Price, i), data.value(Column::CostBasis, i));
    }
    None
}

/// SOPR of row `i` from the column pairs, breakeven when unavailable.
pub fn row_sopr(data: &Table, i: usize) -> f64 {
    pair_sopr(data, i).unwrap_or(1.0)
}

/// Best available per-row SOPR reading: a column pair, then the `sopr`
/// column, then breakeven.
pub fn observed_row_sopr(data: &Table, i: usize) -> f64 {
    pair_sopr(data, i)
        .or_else(|| data.value(Column::Sopr, i))
        .unwrap_or(1.0)
}

/// Point SOPR on the last row and the mean over the last 7 rows.
pub fn calculate_sopr_metrics(data: &Table) -> SoprMetrics {
    if data.is_empty() {
        return SoprMetrics::default();
    }
    let last = data.len() - 1;
    let sopr_value = row_sopr(data, last);
    let adjusted_sopr = if data.len() >= ADJUSTED_WINDOW {
        let window: Vec<f64> = (data.len() - ADJUSTED_WINDOW..data.len())
            .map(|i| row_sopr(data, i))
            .collect();
        stats::mean(&window)
    } else {
        sopr_value
    };
    SoprMetrics {
        sopr_value,
        adjusted_sopr,
    }
}

/// Observed SOPR time series: the finite values of the `sopr` column when
/// present, otherwise the per-row ratios of whichever column pair exists.
/// Empty when the table carries no SOPR information at all.
pub fn sopr_series(data: &Table) -> Vec<f64> {
    if data.has(Column::Sopr) {
        return data.finite(Column::Sopr);
    }
    (0..data.len()).filter_map(|i| pair_sopr(data, i)).collect()
}

/// Relative price changes over the whole table.
pub fn price_changes(data: &Table) -> Vec<f64> {
    data.column(Column::Price)
        .map(stats::pct_change)
        .unwrap_or_default()
}

/// Relative price changes within the last `rows` rows.
pub fn recent_price_changes(data: &Table, rows: usize) -> Vec<f64> {
    price_changes(&data.tail(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spent_table(realized: Vec<f64>, spent: Vec<f64>) -> Table {
        Table::from_columns([(Column::RealizedPrice, realized), (Column::SpentPrice, spent)])
            .unwrap()
    }

    #[test]
    fn test_sopr_is_last_row_ratio() {
        let table = spent_table(vec![10.0, 12.0, 15.0], vec![10.0, 10.0, 12.0]);
        let m = calculate_sopr_metrics(&table);
        assert!((m.sopr_value - 1.25).abs() < 1e-12);
        assert_eq!(m.adjusted_sopr, m.sopr_value, "short tables reuse the point value");
    }

    #[test]
    fn test_breakeven_without_columns() {
        let table = Table::from_columns([(Column::Volume, vec![1.0, 2.0])]).unwrap();
        let m = calculate_sopr_metrics(&table);
        assert_eq!(m.sopr_value, 1.0);
        assert_eq!(m.adjusted_sopr, 1.0);
    }

    #[test]
    fn test_breakeven_on_zero_denominator() {
        let table = spent_table(vec![5.0], vec![0.0]);
        assert_eq!(calculate_sopr_metrics(&table).sopr_value, 1.0);
    }

    #[test]
    fn test_cost_basis_fallback() {
        let table = Table::from_columns([
            (Column::Price, vec![110.0]),
            (Column::CostBasis, vec![100.0]),
        ])
        .unwrap();
        assert!((calculate_sopr_metrics(&table).sopr_value - 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_adjusted_uses_last_seven_rows() {
        let realized: Vec<f64> = (1..=10).map(|i| i as f64).collect();
        let table = spent_table(realized, vec![1.0; 10]);
        let m = calculate_sopr_metrics(&table);
        assert_eq!(m.sopr_value, 10.0);
        assert!((m.adjusted_sopr - 7.0).abs() < 1e-12, "mean of 4..=10 is 7");
    }

    #[test]
    fn test_sopr_series_prefers_column() {
        let table = Table::from_columns([
            (Column::Sopr, vec![1.0, f64::NAN, 1.2]),
            (Column::Price, vec![1.0, 2.0, 3.0]),
            (Column::CostBasis, vec![1.0, 1.0, 1.0]),
        ])
        .unwrap();
        assert_eq!(sopr_series(&table), vec![1.0, 1.2]);
        assert_eq!(observed_row_sopr(&table, 2), 3.0);
    }
}
