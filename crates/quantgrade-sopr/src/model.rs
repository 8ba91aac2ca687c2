//! Fitted model state.
//!
//! [`FittedParameters`] is built once by [`fit`] and never mutated; the
//! pipeline shares it behind an `Arc` so concurrent analyses can read it.

use chrono::{DateTime, Utc};
use quantgrade_core::config::{EnsembleConfig, SoprConfig};
use quantgrade_core::error::QuantError;
use quantgrade_core::table::Table;
use quantgrade_core::traits::CohortDataSource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::behavior::{self, BehavioralMetrics, BehavioralRegime};
use crate::cluster::GaussianMixture;
use crate::cohort;
use crate::degrade::StepLog;
use crate::features::{self, FeatureVector, FEATURE_NAMES};
use crate::forecast::scaler::RobustScaler;
use crate::forecast::{Ensemble, MODEL_NAMES};
use crate::isolation::IsolationForest;
use crate::metrics;
use crate::regime::RegimeModel;
use crate::stats;

/// Behavioral vectors are sampled every seventh window.
const BEHAVIOR_STRIDE: usize = 7;
/// Rows replayed by [`FittedParameters::evaluate`].
pub const EVALUATION_ROWS: usize = 60;
const MIN_OUTLIER_ROWS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub fitted_at: DateTime<Utc>,
    pub rows: usize,
    pub training_samples: usize,
    pub behavior_samples: usize,
    /// Auxiliary models that could not be fitted.
    pub skipped_models: Vec<String>,
}

/// Mixture component a behavioral vector most likely belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralCluster {
    pub component: usize,
    pub label: BehavioralRegime,
    pub probabilities: Vec<f64>,
}

/// Gaussian mixture over behavioral vectors, with each component named by
/// classifying its mean.
#[derive(Debug, Clone)]
pub struct BehaviorModel {
    mixture: GaussianMixture,
    labels: Vec<BehavioralRegime>,
}

impl BehaviorModel {
    pub fn fit(rows: &[Vec<f64>], k: usize, seed: u64) -> Result<Self, QuantError> {
        let mixture = GaussianMixture::fit(rows, k, seed)?;
        let labels = mixture
            .means()
            .iter()
            .map(|m| {
                let at = |i: usize| m.get(i).copied().unwrap_or(0.0);
                behavior::classify(&BehavioralMetrics {
                    profit_taking_intensity: at(0),
                    loss_realization_rate: at(1),
                    hodling_strength: at(2),
                    euphoria_score: at(3),
                    capitulation_score: at(4),
                    accumulation_score: at(5),
                    distribution_score: at(6),
                    panic_selling_score: 0.0,
                    ..Default::default()
                })
            })
            .collect();
        Ok(Self { mixture, labels })
    }

    pub fn cluster(&self, metrics: &BehavioralMetrics) -> BehavioralCluster {
        let probabilities = self.mixture.predict_proba(&metrics.cluster_features());
        let component = probabilities
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, &p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            })
            .0;
        BehavioralCluster {
            component,
            label: self
                .labels
                .get(component)
                .copied()
                .unwrap_or(BehavioralRegime::Neutral),
            probabilities,
        }
    }
}

/// Everything `fit` learns. Immutable once built.
#[derive(Debug, Clone)]
pub struct FittedParameters {
    scaler: RobustScaler,
    ensemble: Ensemble,
    regime: Option<RegimeModel>,
    behavior: Option<BehaviorModel>,
    outliers: Option<IsolationForest>,
    feature_names: Vec<String>,
    summary: TrainingSummary,
}

impl FittedParameters {
    pub fn scale(&self, features: &FeatureVector) -> Vec<f64> {
        self.scaler.transform(features)
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn regime(&self) -> Option<&RegimeModel> {
        self.regime.as_ref()
    }

    pub fn behavior(&self) -> Option<&BehaviorModel> {
        self.behavior.as_ref()
    }

    pub fn outliers(&self) -> Option<&IsolationForest> {
        self.outliers.as_ref()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn summary(&self) -> &TrainingSummary {
        &self.summary
    }

    /// Replay the last 60 rows through the regressors and report
    /// `{model}_mse`, `{model}_mae` and `{model}_r2`.
    pub fn evaluate(
        &self,
        data: &Table,
        source: &dyn CohortDataSource,
        window: usize,
    ) -> Result<BTreeMap<String, f64>, QuantError> {
        if data.len() < EVALUATION_ROWS {
            return Err(QuantError::insufficient(
                "model_performance",
                EVALUATION_ROWS,
                data.len(),
            ));
        }
        let (x, y) = training_set(&data.tail(EVALUATION_ROWS), source, window);
        if x.is_empty() {
            return Err(QuantError::insufficient("model_performance", window + 1, 0));
        }
        let scaled = self.scaler.transform_all(&x);
        let outputs: Vec<[f64; 4]> = scaled.iter().map(|r| self.ensemble.predict(r)).collect();

        let mut performance = BTreeMap::new();
        for (m, name) in MODEL_NAMES.iter().enumerate() {
            let predicted: Vec<f64> = outputs.iter().map(|o| o[m]).collect();
            let (mse, mae, r2) = regression_scores(&y, &predicted);
            performance.insert(format!("{name}_mse"), mse);
            performance.insert(format!("{name}_mae"), mae);
            performance.insert(format!("{name}_r2"), r2);
        }
        Ok(performance)
    }
}

/// Mean squared error, mean absolute error and coefficient of determination.
pub fn regression_scores(actual: &[f64], predicted: &[f64]) -> (f64, f64, f64) {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return (0.0, 0.0, 0.0);
    }
    let residuals: Vec<f64> = actual.iter().zip(predicted).map(|(a, p)| a - p).collect();
    let ss_res: f64 = residuals.iter().map(|r| r * r).sum();
    let mae = residuals.iter().map(|r| r.abs()).sum::<f64>() / n as f64;
    let mean = stats::mean(&actual[..n]);
    let ss_tot: f64 = actual[..n].iter().map(|a| (a - mean).powi(2)).sum();
    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };
    (ss_res / n as f64, mae, r2)
}

/// Sliding windows: features of rows `[i - window, i)` against the observed
/// SOPR of row `i`.
pub fn training_set(
    data: &Table,
    source: &dyn CohortDataSource,
    window: usize,
) -> (Vec<Vec<f64>>, Vec<f64>) {
    let mut x = Vec::new();
    let mut y = Vec::new();
    for i in window..data.len() {
        let target = metrics::observed_row_sopr(data, i);
        if !target.is_finite() {
            continue;
        }
        let v = features::window_features(&data.slice(i - window..i), source);
        x.push(v.to_vec());
        y.push(target);
    }
    (x, y)
}

/// Behavioral vectors of every seventh window.
pub fn behavior_samples(
    data: &Table,
    source: &dyn CohortDataSource,
    window: usize,
) -> Vec<Vec<f64>> {
    (window..data.len())
        .step_by(BEHAVIOR_STRIDE)
        .map(|i| {
            let slice = data.slice(i - window..i);
            let mut log = StepLog::new();
            let cohorts = log.recover("cohorts", cohort::build_cohorts(source, &slice), Vec::new);
            behavior::score(&slice, &cohorts, &mut log)
                .cluster_features()
                .to_vec()
        })
        .collect()
}

/// Fit every model on `data`. Fails when fewer than `lookback_period` rows
/// are given or the regressors cannot be trained; auxiliary models that
/// fail are skipped and listed in the summary.
pub fn fit(
    data: &Table,
    source: &dyn CohortDataSource,
    sopr: &SoprConfig,
    cfg: &EnsembleConfig,
) -> Result<FittedParameters, QuantError> {
    info!("fitting SOPR models on {} rows", data.len());
    if data.len() < sopr.lookback_period {
        warn!(
            "insufficient data for fitting: need {} rows, got {}",
            sopr.lookback_period,
            data.len()
        );
        return Err(QuantError::insufficient("fit", sopr.lookback_period, data.len()));
    }

    let window = sopr.training_window;
    let (x, y) = training_set(data, source, window);
    if x.is_empty() {
        warn!("no valid training windows");
        return Err(QuantError::insufficient("fit", window + 1, data.len()));
    }
    let scaler = RobustScaler::fit(&x)?;
    let x_scaled = scaler.transform_all(&x);
    let ensemble = Ensemble::fit(&x_scaled, &y, cfg)?;
    debug!("ensemble fitted on {} windows", x_scaled.len());

    let mut log = StepLog::new();
    let regime = log.optional(
        "regime_model",
        RegimeModel::fit(&x_scaled, cfg.regime_clusters, cfg.seed),
    );
    let samples = behavior_samples(data, source, window);
    let behavior = log.optional(
        "behavior_model",
        BehaviorModel::fit(&samples, cfg.behavior_components, cfg.seed),
    );
    let outliers = if x_scaled.len() > MIN_OUTLIER_ROWS {
        log.optional(
            "anomaly_model",
            IsolationForest::fit(&x_scaled, cfg.isolation_trees, cfg.contamination, cfg.seed),
        )
    } else {
        None
    };

    let summary = TrainingSummary {
        fitted_at: Utc::now(),
        rows: data.len(),
        training_samples: x_scaled.len(),
        behavior_samples: samples.len(),
        skipped_models: log.into_steps(),
    };
    info!(
        "SOPR model fitting completed: {} windows, {} skipped models",
        summary.training_samples,
        summary.skipped_models.len()
    );
    Ok(FittedParameters {
        scaler,
        ensemble,
        regime,
        behavior,
        outliers,
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        summary,
    })
}
