//! Median / inter-quartile-range scaler, robust to outlying windows.

use quantgrade_core::error::QuantError;

use crate::stats;

#[derive(Debug, Clone)]
pub struct RobustScaler {
    center: Vec<f64>,
    scale: Vec<f64>,
}

impl RobustScaler {
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self, QuantError> {
        let dim = rows
            .first()
            .map(Vec::len)
            .ok_or_else(|| QuantError::Model("cannot fit scaler on empty data".into()))?;
        let mut center = Vec::with_capacity(dim);
        let mut scale = Vec::with_capacity(dim);
        for d in 0..dim {
            let col: Vec<f64> = rows.iter().map(|r| r[d]).collect();
            let iqr = stats::percentile(&col, 75.0) - stats::percentile(&col, 25.0);
            center.push(stats::median(&col));
            // Constant features pass through unscaled.
            scale.push(if iqr > 0.0 && iqr.is_finite() { iqr } else { 1.0 });
        }
        Ok(Self { center, scale })
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.center.iter().zip(&self.scale))
            .map(|(x, (c, s))| (x - c) / s)
            .collect()
    }

    pub fn transform_all(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform(r)).collect()
    }
}
