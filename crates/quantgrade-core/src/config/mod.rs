mod defaults;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::QuantError;
use defaults::*;

/// Top-level quantgrade configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub sopr: SoprConfig,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub overlays: OverlayConfig,
    #[serde(default)]
    pub cohort: CohortConfig,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Core SOPR analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoprConfig {
    /// Minimum rows required before `fit` trains anything.
    #[serde(default = "default_lookback_period")]
    pub lookback_period: usize,
    /// Forecast horizons in days.
    #[serde(default = "default_prediction_horizons")]
    pub prediction_horizons: Vec<u32>,
    /// Z-score multiplier for statistical anomalies.
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,
    /// Confidence level of prediction intervals.
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
    /// Inputs longer than this are truncated to the most recent rows.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    /// Window used by the microstructure and statistical analyses.
    #[serde(default = "default_recent_rows")]
    pub recent_rows: usize,
    /// Rows per training sample of the forecast ensemble.
    #[serde(default = "default_training_window")]
    pub training_window: usize,
}

impl Default for SoprConfig {
    fn default() -> Self {
        Self {
            lookback_period: default_lookback_period(),
            prediction_horizons: default_prediction_horizons(),
            anomaly_threshold: default_anomaly_threshold(),
            confidence_level: default_confidence_level(),
            max_rows: default_max_rows(),
            recent_rows: default_recent_rows(),
            training_window: default_training_window(),
        }
    }
}

/// Learner hyper-parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_boosting_depth")]
    pub boosting_depth: usize,
    #[serde(default = "default_alpha")]
    pub ridge_alpha: f64,
    #[serde(default = "default_alpha")]
    pub elastic_alpha: f64,
    #[serde(default = "default_l1_ratio")]
    pub elastic_l1_ratio: f64,
    #[serde(default = "default_clusters")]
    pub regime_clusters: usize,
    #[serde(default = "default_clusters")]
    pub behavior_components: usize,
    #[serde(default = "default_isolation_trees")]
    pub isolation_trees: usize,
    #[serde(default = "default_contamination")]
    pub contamination: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            n_estimators: default_n_estimators(),
            max_depth: default_max_depth(),
            min_samples_leaf: default_min_samples_leaf(),
            learning_rate: default_learning_rate(),
            boosting_depth: default_boosting_depth(),
            ridge_alpha: default_alpha(),
            elastic_alpha: default_alpha(),
            elastic_l1_ratio: default_l1_ratio(),
            regime_clusters: default_clusters(),
            behavior_components: default_clusters(),
            isolation_trees: default_isolation_trees(),
            contamination: default_contamination(),
            seed: default_seed(),
        }
    }
}

/// Kalman and Monte Carlo overlay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    #[serde(default = "default_true")]
    pub enable_kalman: bool,
    #[serde(default = "default_em_iterations")]
    pub kalman_em_iterations: usize,
    #[serde(default = "default_kalman_max_observations")]
    pub kalman_max_observations: usize,
    #[serde(default = "default_true")]
    pub enable_monte_carlo: bool,
    #[serde(default = "default_simulations")]
    pub monte_carlo_simulations: usize,
    #[serde(default = "default_seed")]
    pub monte_carlo_seed: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enable_kalman: default_true(),
            kalman_em_iterations: default_em_iterations(),
            kalman_max_observations: default_kalman_max_observations(),
            enable_monte_carlo: default_true(),
            monte_carlo_simulations: default_simulations(),
            monte_carlo_seed: default_seed(),
        }
    }
}

/// Synthetic cohort generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortConfig {
    /// Share of a cohort's value realized over the window.
    #[serde(default = "default_realized_share")]
    pub realized_share: f64,
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            realized_share: default_realized_share(),
        }
    }
}

impl Config {
    /// Reject settings that would make the pipeline meaningless.
    pub fn validate(&self) -> Result<(), QuantError> {
        let sopr = &self.sopr;
        if sopr.lookback_period == 0 || sopr.training_window == 0 || sopr.max_rows == 0 {
            return Err(QuantError::Config(
                "lookback_period, training_window and max_rows must be positive".into(),
            ));
        }
        if sopr.prediction_horizons.is_empty() {
            return Err(QuantError::Config(
                "prediction_horizons must not be empty".into(),
            ));
        }
        if !(sopr.confidence_level > 0.0 && sopr.confidence_level < 1.0) {
            return Err(QuantError::Config(format!(
                "confidence_level must be in (0, 1), got {}",
                sopr.confidence_level
            )));
        }
        if !(sopr.anomaly_threshold > 0.0) {
            return Err(QuantError::Config(
                "anomaly_threshold must be positive".into(),
            ));
        }
        let share = self.cohort.realized_share;
        if !(share > 0.0 && share <= 1.0) {
            return Err(QuantError::Config(format!(
                "realized_share must be in (0, 1], got {share}"
            )));
        }
        let ens = &self.ensemble;
        if ens.n_estimators == 0 || ens.regime_clusters == 0 || ens.behavior_components == 0 {
            return Err(QuantError::Config(
                "ensemble sizes must be positive".into(),
            ));
        }
        if !(ens.contamination > 0.0 && ens.contamination < 0.5) {
            return Err(QuantError::Config(
                "contamination must be in (0, 0.5)".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from a TOML file, falling back to defaults.
pub fn load(path: &str) -> Result<Config, QuantError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| QuantError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| QuantError::Config(format!("failed to parse config: {}", e)))?;

    config.validate()?;
    Ok(config)
}
