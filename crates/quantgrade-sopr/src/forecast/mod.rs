//! Forecast ensemble: random forest, gradient boosting, ridge and
//! elastic-net regressors averaged into one SOPR forecast per horizon.

pub mod boosting;
pub mod forest;
pub mod linear;
pub mod scaler;
pub mod tree;

use quantgrade_core::config::{EnsembleConfig, SoprConfig};
use quantgrade_core::error::QuantError;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;
use std::fmt;

use crate::features::{FeatureVector, FEATURE_NAMES, VOLATILITY};
use crate::stats;
use boosting::GradientBoosting;
use forest::RandomForest;
use linear::LinearModel;
use tree::TreeParams;

pub const MODEL_NAMES: [&str; 4] = ["random_forest", "gradient_boosting", "ridge", "elastic_net"];

/// Predicted market direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketScenario {
    Bullish,
    Bearish,
    Neutral,
}

impl MarketScenario {
    pub fn from_sopr(predicted: f64) -> Self {
        if predicted > 1.05 {
            Self::Bullish
        } else if predicted < 0.95 {
            Self::Bearish
        } else {
            Self::Neutral
        }
    }
}

impl fmt::Display for MarketScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// One horizon's ensemble forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoprPrediction {
    pub prediction_horizon: u32,
    pub predicted_sopr: f64,
    pub confidence_interval: (f64, f64),
    pub model_confidence: f64,
    pub model_predictions: BTreeMap<String, f64>,
    pub feature_importance: BTreeMap<String, f64>,
    pub behavioral_drivers: Vec<String>,
    pub market_scenario: MarketScenario,
    pub risk_factors: Vec<String>,
}

/// The four fitted regressors. Inputs must already be robust-scaled.
#[derive(Debug, Clone)]
pub struct Ensemble {
    forest: RandomForest,
    boosting: GradientBoosting,
    ridge: LinearModel,
    elastic: LinearModel,
}

impl Ensemble {
    pub fn fit(x: &[Vec<f64>], y: &[f64], cfg: &EnsembleConfig) -> Result<Self, QuantError> {
        if x.is_empty() || x.len() != y.len() {
            return Err(QuantError::Model(format!(
                "training set mismatch: {} rows, {} targets",
                x.len(),
                y.len()
            )));
        }
        let forest = RandomForest::fit(
            x,
            y,
            cfg.n_estimators,
            TreeParams {
                max_depth: cfg.max_depth,
                min_samples_leaf: cfg.min_samples_leaf,
            },
            cfg.seed,
        );
        let boosting = GradientBoosting::fit(
            x,
            y,
            cfg.n_estimators,
            cfg.learning_rate,
            TreeParams {
                max_depth: cfg.boosting_depth,
                min_samples_leaf: 1,
            },
        );
        let ridge = LinearModel::ridge(x, y, cfg.ridge_alpha)?;
        let elastic = LinearModel::elastic_net(x, y, cfg.elastic_alpha, cfg.elastic_l1_ratio)?;
        Ok(Self {
            forest,
            boosting,
            ridge,
            elastic,
        })
    }

    /// Per-model predictions in [`MODEL_NAMES`] order.
    pub fn predict(&self, row: &[f64]) -> [f64; 4] {
        [
            self.forest.predict(row),
            self.boosting.predict(row),
            self.ridge.predict(row),
            self.elastic.predict(row),
        ]
    }

    /// Tree-model importances, each divided by the ensemble size.
    pub fn feature_importance(&self) -> BTreeMap<String, f64> {
        let mut out: BTreeMap<String, f64> = FEATURE_NAMES
            .iter()
            .map(|name| (name.to_string(), 0.0))
            .collect();
        for imp in [self.forest.importances(), self.boosting.importances()] {
            for (name, value) in FEATURE_NAMES.iter().zip(imp) {
                if let Some(slot) = out.get_mut(*name) {
                    *slot += value / MODEL_NAMES.len() as f64;
                }
            }
        }
        out
    }
}

/// Two-sided normal quantile for a confidence level.
pub fn z_score(confidence_level: f64) -> f64 {
    if (confidence_level - 0.95).abs() < 1e-9 {
        return 1.96;
    }
    if (confidence_level - 0.99).abs() < 1e-9 {
        return 2.58;
    }
    Normal::new(0.0, 1.0)
        .map(|n| n.inverse_cdf(0.5 + confidence_level.clamp(0.0, 0.9999) / 2.0))
        .unwrap_or(1.96)
}

/// Threshold rules on the unscaled feature vector.
pub fn behavioral_drivers(features: &FeatureVector) -> Vec<String> {
    let mut drivers = Vec::new();
    if features[5] > 0.7 {
        drivers.push("High profit taking activity".to_string());
    }
    if features[6] > 0.7 {
        drivers.push("Significant loss realization".to_string());
    }
    if features[7] > 0.7 {
        drivers.push("Strong hodling behavior".to_string());
    }
    if features[8] > 0.5 {
        drivers.push("Market euphoria".to_string());
    }
    if features[9] > 0.5 {
        drivers.push("Capitulation signals".to_string());
    }
    if drivers.is_empty() {
        drivers.push("Balanced market behavior".to_string());
    }
    drivers
}

/// Risks attached to a forecast of `horizon` days on `rows` of history.
pub fn prediction_risks(
    features: &FeatureVector,
    rows: usize,
    horizon: u32,
    cfg: &SoprConfig,
) -> Vec<String> {
    let mut risks = Vec::new();
    if rows < cfg.lookback_period {
        risks.push("Limited historical data".to_string());
    }
    if rows > 30 && features[VOLATILITY] > 0.1 {
        risks.push("High price volatility".to_string());
    }
    if features[8] > 0.7 {
        risks.push("Extreme euphoria conditions".to_string());
    }
    if features[9] > 0.7 {
        risks.push("Capitulation risk".to_string());
    }
    if horizon > 30 {
        risks.push("Long-term prediction uncertainty".to_string());
    }
    risks
}

/// Build one prediction per configured horizon from the raw and scaled
/// current feature vectors.
pub fn forecast(
    ensemble: &Ensemble,
    features: &FeatureVector,
    scaled: &[f64],
    rows: usize,
    cfg: &SoprConfig,
) -> Result<Vec<SoprPrediction>, QuantError> {
    let outputs = ensemble.predict(scaled);
    if outputs.iter().any(|p| !p.is_finite()) {
        return Err(QuantError::Numerical(format!(
            "non-finite ensemble output: {outputs:?}"
        )));
    }
    let mean = stats::mean(&outputs);
    let spread = stats::std(&outputs);
    let z = z_score(cfg.confidence_level);
    let model_confidence = stats::clamp01(1.0 - spread / (mean.abs() + 1.0));
    let model_predictions: BTreeMap<String, f64> = MODEL_NAMES
        .iter()
        .zip(outputs)
        .map(|(name, p)| (name.to_string(), p))
        .collect();
    let importance = ensemble.feature_importance();
    let drivers = behavioral_drivers(features);

    Ok(cfg
        .prediction_horizons
        .iter()
        .map(|&horizon| SoprPrediction {
            prediction_horizon: horizon,
            predicted_sopr: mean,
            confidence_interval: (mean - z * spread, mean + z * spread),
            model_confidence,
            model_predictions: model_predictions.clone(),
            feature_importance: importance.clone(),
            behavioral_drivers: drivers.clone(),
            market_scenario: MarketScenario::from_sopr(mean),
            risk_factors: prediction_risks(features, rows, horizon, cfg),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features() -> FeatureVector {
        let mut f = [0.0; 13];
        f[0] = 1.0;
        f[1] = 1.0;
        f
    }

    #[test]
    fn test_z_scores() {
        assert_eq!(z_score(0.95), 1.96);
        assert_eq!(z_score(0.99), 2.58);
        let z90 = z_score(0.90);
        assert!((z90 - 1.6449).abs() < 1e-3, "z(0.90) = {z90}");
    }

    #[test]
    fn test_scenario_thresholds() {
        assert_eq!(MarketScenario::from_sopr(1.06), MarketScenario::Bullish);
        assert_eq!(MarketScenario::from_sopr(0.94), MarketScenario::Bearish);
        assert_eq!(MarketScenario::from_sopr(1.0), MarketScenario::Neutral);
    }

    #[test]
    fn test_balanced_driver_when_nothing_stands_out() {
        assert_eq!(behavioral_drivers(&features()), vec!["Balanced market behavior"]);
        let mut f = features();
        f[7] = 0.9;
        f[9] = 0.6;
        assert_eq!(
            behavioral_drivers(&f),
            vec!["Strong hodling behavior", "Capitulation signals"]
        );
    }

    #[test]
    fn test_long_horizon_and_short_history_risks() {
        let cfg = SoprConfig::default();
        let risks = prediction_risks(&features(), 100, 90, &cfg);
        assert!(risks.contains(&"Limited historical data".to_string()));
        assert!(risks.contains(&"Long-term prediction uncertainty".to_string()));
        let risks = prediction_risks(&features(), 400, 7, &cfg);
        assert!(risks.is_empty());
    }

    #[test]
    fn test_forecast_interval_brackets_mean() {
        let x: Vec<Vec<f64>> = (0..80)
            .map(|i| vec![(i as f64 * 0.1).sin(), (i as f64 * 0.05).cos()])
            .collect();
        let y: Vec<f64> = x.iter().map(|r| 1.0 + 0.1 * r[0] - 0.05 * r[1]).collect();
        let cfg = EnsembleConfig {
            n_estimators: 10,
            ..Default::default()
        };
        let ensemble = Ensemble::fit(&x, &y, &cfg).unwrap();
        let sopr_cfg = SoprConfig::default();
        let preds = forecast(&ensemble, &features(), &[0.5, 0.5], 400, &sopr_cfg).unwrap();
        assert_eq!(preds.len(), 3);
        for p in &preds {
            let (lo, hi) = p.confidence_interval;
            assert!(lo <= p.predicted_sopr && p.predicted_sopr <= hi);
            assert!((0.0..=1.0).contains(&p.model_confidence));
            assert_eq!(p.model_predictions.len(), 4);
        }
        assert_eq!(preds[2].prediction_horizon, 90);
    }
}
