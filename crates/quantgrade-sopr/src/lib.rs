//! # quantgrade-sopr
//!
//! Quant-grade SOPR (Spent Output Profit Ratio) analysis. Derives holder
//! cohorts, behavioral scores, market regimes, risk and P&L figures,
//! ensemble forecasts and anomaly alerts from a time-ordered table, with
//! Kalman smoothing and Monte Carlo overlays on top. Every step degrades to
//! a neutral default instead of failing the whole analysis.

pub mod anomaly;
pub mod behavior;
pub mod cluster;
pub mod cohort;
pub mod degrade;
pub mod enhanced;
pub mod features;
pub mod forecast;
pub mod isolation;
pub mod kalman;
pub mod market;
pub mod metrics;
pub mod model;
pub mod monte_carlo;
pub mod pnl;
pub mod regime;
pub mod report;
pub mod risk;
pub mod stats;

#[cfg(test)]
mod tests;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use quantgrade_core::config::Config;
use quantgrade_core::error::QuantError;
use quantgrade_core::table::{Column, Table};
use quantgrade_core::traits::CohortDataSource;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use anomaly::SoprAnomaly;
use behavior::BehavioralMetrics;
use cohort::{SimulatedCohortSource, UtxoCohort};
use degrade::StepLog;
use enhanced::{
    AdjustedSoprAnalysis, LongTermHolderAnalysis, ProfitLossDistribution,
    ShortTermHolderAnalysis,
};
use features::FeatureVector;
use forecast::SoprPrediction;
use kalman::{KalmanAnalysis, KalmanSmoother, SoprSmoother};
use market::{MicrostructureAnalysis, PredictiveMetrics, StatisticalMetrics, VolatilityAnalysis};
use metrics::SoprMetrics;
use model::{FittedParameters, EVALUATION_ROWS};
use monte_carlo::{GbmSimulator, MonteCarloAnalysis, PathSimulator};
use regime::MarketRegimeAnalysis;
use report::{AnalysisMetadata, SoprResult};
use risk::SoprRisk;

/// Rows required before the Kalman overlay runs.
const KALMAN_MIN_ROWS: usize = 30;
/// Rows required before the Monte Carlo overlay runs.
const MONTE_CARLO_MIN_ROWS: usize = 50;

/// Figures every entry point derives from the current table.
struct Snapshot {
    sopr: SoprMetrics,
    cohorts: Vec<UtxoCohort>,
    behavior: BehavioralMetrics,
    features: FeatureVector,
}

#[derive(Default)]
struct RecentAnalyses {
    asopr: Option<AdjustedSoprAnalysis>,
    sth: Option<ShortTermHolderAnalysis>,
    lth: Option<LongTermHolderAnalysis>,
    distribution: Option<ProfitLossDistribution>,
    microstructure: Option<MicrostructureAnalysis>,
    volatility: Option<VolatilityAnalysis>,
    statistical: Option<StatisticalMetrics>,
    correlation: Option<BTreeMap<String, f64>>,
    predictive: Option<PredictiveMetrics>,
}

/// Main orchestrator. Holds configuration and the pluggable strategies;
/// fitted state lives in [`FittedParameters`], never here.
pub struct SoprPipeline {
    config: Config,
    source: Box<dyn CohortDataSource>,
    smoother: Option<Box<dyn SoprSmoother>>,
    simulator: Option<Box<dyn PathSimulator>>,
}

impl SoprPipeline {
    /// Build a pipeline with the simulated cohort source and the overlays
    /// enabled in `config.overlays`.
    pub fn new(config: Config) -> Self {
        if let Err(e) = config.validate() {
            warn!("invalid SOPR configuration, fitting will be refused: {e}");
        }
        let overlays = &config.overlays;
        let smoother: Option<Box<dyn SoprSmoother>> = overlays.enable_kalman.then(|| {
            Box::new(KalmanSmoother {
                em_iterations: overlays.kalman_em_iterations,
                max_observations: overlays.kalman_max_observations,
            }) as Box<dyn SoprSmoother>
        });
        let simulator: Option<Box<dyn PathSimulator>> = overlays.enable_monte_carlo.then(|| {
            Box::new(GbmSimulator {
                simulations: overlays.monte_carlo_simulations,
                seed: overlays.monte_carlo_seed,
            }) as Box<dyn PathSimulator>
        });
        let source = Box::new(SimulatedCohortSource::new(config.cohort.realized_share));
        Self {
            config,
            source,
            smoother,
            simulator,
        }
    }

    /// Replace the cohort data source.
    pub fn with_source(mut self, source: Box<dyn CohortDataSource>) -> Self {
        self.source = source;
        self
    }

    /// Replace the smoothing strategy. `None` disables the Kalman overlay.
    pub fn with_smoother(mut self, smoother: Option<Box<dyn SoprSmoother>>) -> Self {
        self.smoother = smoother;
        self
    }

    /// Replace the path simulator. `None` disables the Monte Carlo overlay.
    pub fn with_simulator(mut self, simulator: Option<Box<dyn PathSimulator>>) -> Self {
        self.simulator = simulator;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Train every model on `data`. Returns a fresh, immutable parameter set.
    /// Fails on a configuration that `Config::validate` rejects.
    pub fn fit(&self, data: &Table) -> Result<FittedParameters, QuantError> {
        self.config.validate()?;
        let (data, _) = self.truncate(data);
        model::fit(
            &data,
            self.source.as_ref(),
            &self.config.sopr,
            &self.config.ensemble,
        )
    }

    /// Full analysis. Never panics and never fails: step failures degrade to
    /// defaults and a panic anywhere yields [`SoprResult::fallback`].
    pub fn analyze(&self, data: &Table, fitted: Option<&FittedParameters>) -> SoprResult {
        info!("starting SOPR analysis on {} rows", data.len());
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_analysis(data, fitted))) {
            Ok(result) => {
                info!(
                    "SOPR analysis completed: sopr={:.4}, regime={}, confidence={:.2}",
                    result.sopr_value,
                    result.regime_analysis.current_regime,
                    result.confidence_score
                );
                result
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "analysis panicked".to_string());
                error!("SOPR analysis aborted: {message}");
                SoprResult::fallback(message, data.len().min(self.config.sopr.max_rows))
            }
        }
    }

    /// Ensemble forecasts for the configured horizons. Empty when unfitted.
    pub fn generate_predictions(
        &self,
        data: &Table,
        fitted: Option<&FittedParameters>,
    ) -> Vec<SoprPrediction> {
        let (data, _) = self.truncate(data);
        let mut log = StepLog::new();
        let snapshot = self.snapshot(&data, &mut log);
        self.predictions(&data, &snapshot, fitted, &mut log)
    }

    /// Statistical, hodling and (when fitted) outlier anomalies.
    pub fn detect_anomalies(
        &self,
        data: &Table,
        fitted: Option<&FittedParameters>,
    ) -> Vec<SoprAnomaly> {
        let (data, _) = self.truncate(data);
        let mut log = StepLog::new();
        let snapshot = self.snapshot(&data, &mut log);
        self.anomalies(&data, &snapshot, fitted, &mut log)
    }

    fn truncate<'a>(&self, data: &'a Table) -> (Cow<'a, Table>, bool) {
        let max_rows = self.config.sopr.max_rows;
        if data.len() > max_rows {
            debug!("truncating {} rows to the most recent {max_rows}", data.len());
            (Cow::Owned(data.tail(max_rows)), true)
        } else {
            (Cow::Borrowed(data), false)
        }
    }

    fn snapshot(&self, data: &Table, log: &mut StepLog) -> Snapshot {
        let sopr = metrics::calculate_sopr_metrics(data);
        let cohorts = log.recover(
            "utxo_cohorts",
            cohort::build_cohorts(self.source.as_ref(), data),
            Vec::new,
        );
        let behavior = behavior::score(data, &cohorts, log);
        let features = features::feature_vector(data, &sopr, &cohorts, &behavior);
        Snapshot {
            sopr,
            cohorts,
            behavior,
            features,
        }
    }

    fn predictions(
        &self,
        data: &Table,
        snapshot: &Snapshot,
        fitted: Option<&FittedParameters>,
        log: &mut StepLog,
    ) -> Vec<SoprPrediction> {
        let Some(fitted) = fitted else {
            warn!("model not fitted, skipping predictions");
            return Vec::new();
        };
        let scaled = fitted.scale(&snapshot.features);
        log.recover(
            "predictions",
            forecast::forecast(
                fitted.ensemble(),
                &snapshot.features,
                &scaled,
                data.len(),
                &self.config.sopr,
            ),
            Vec::new,
        )
    }

    fn anomalies(
        &self,
        data: &Table,
        snapshot: &Snapshot,
        fitted: Option<&FittedParameters>,
        log: &mut StepLog,
    ) -> Vec<SoprAnomaly> {
        let scaled = fitted.map(|f| f.scale(&snapshot.features));
        let outlier = fitted
            .and_then(|f| f.outliers())
            .zip(scaled.as_deref());
        log.recover(
            "anomalies",
            anomaly::detect(
                data,
                &snapshot.cohorts,
                self.config.sopr.anomaly_threshold,
                outlier,
            ),
            Vec::new,
        )
    }

    /// Series analyses over the most recent `recent_rows`. The window copy
    /// is dropped when this returns.
    fn recent_analyses(&self, data: &Table, log: &mut StepLog) -> RecentAnalyses {
        let recent = data.tail(self.config.sopr.recent_rows);
        let mut out = RecentAnalyses::default();
        if recent.has(Column::Price) && recent.has(Column::Volume) {
            out.microstructure =
                log.optional("microstructure_analysis", market::microstructure(&recent));
        }
        if !recent.has(Column::Sopr) {
            debug!("no sopr column, skipping series analyses");
            return out;
        }
        out.asopr = log.optional("asopr_analysis", enhanced::adjusted_sopr_analysis(&recent));
        out.sth = log.optional(
            "sth_sopr_analysis",
            enhanced::short_term_holder_analysis(&recent),
        );
        out.lth = log.optional(
            "lth_sopr_analysis",
            enhanced::long_term_holder_analysis(&recent),
        );
        out.distribution = log.optional(
            "profit_loss_distribution",
            enhanced::profit_loss_distribution(&recent),
        );
        out.volatility = log.optional("volatility_analysis", market::volatility(&recent));
        out.statistical = log.optional("statistical_metrics", market::statistical_metrics(&recent));
        out.correlation = log.optional("correlation_metrics", market::correlations(&recent));
        out.predictive = log.optional("predictive_metrics", market::predictive_metrics(&recent));
        out
    }

    fn run_analysis(&self, input: &Table, fitted: Option<&FittedParameters>) -> SoprResult {
        let (data, truncated) = self.truncate(input);
        let mut log = StepLog::new();
        let snapshot = self.snapshot(&data, &mut log);

        let scaled = fitted.map(|f| f.scale(&snapshot.features));
        let regime_analysis = log.recover(
            "regime_analysis",
            regime::analyze(
                &data,
                &snapshot.behavior,
                scaled.as_deref().unwrap_or(&[]),
                fitted.and_then(|f| f.regime()),
            ),
            MarketRegimeAnalysis::failed,
        );
        let profit_loss_analysis = log.recover(
            "profit_loss_analysis",
            pnl::analyze(&data, &snapshot.cohorts),
            Default::default,
        );
        let predictions = self.predictions(&data, &snapshot, fitted, &mut log);
        let anomalies = self.anomalies(&data, &snapshot, fitted, &mut log);
        let risk_assessment = log.recover(
            "risk_assessment",
            risk::assess(&data, &snapshot.cohorts, &snapshot.behavior),
            SoprRisk::default,
        );

        let recent = self.recent_analyses(&data, &mut log);

        let behavioral_cluster = fitted
            .and_then(|f| f.behavior())
            .map(|m| m.cluster(&snapshot.behavior));

        let mut series = metrics::sopr_series(&data);
        if series.is_empty() {
            series = vec![1.0; data.len()];
        }
        let kalman_analysis = self
            .smoother
            .as_ref()
            .filter(|_| data.len() >= KALMAN_MIN_ROWS)
            .map(|s| {
                debug!("running {} smoother", s.name());
                log.recover("kalman_analysis", s.smooth(&series), || {
                    KalmanAnalysis::passthrough(&series)
                })
            });
        let monte_carlo_analysis = self
            .simulator
            .as_ref()
            .filter(|_| data.len() >= MONTE_CARLO_MIN_ROWS)
            .map(|s| {
                debug!("running {} simulator", s.name());
                log.recover(
                    "monte_carlo_analysis",
                    s.simulate(&series),
                    MonteCarloAnalysis::fallback,
                )
            });

        let model_performance = fitted
            .filter(|_| data.len() >= EVALUATION_ROWS)
            .and_then(|f| {
                log.optional(
                    "model_performance",
                    f.evaluate(&data, self.source.as_ref(), self.config.sopr.training_window),
                )
            });

        let is_fitted = fitted.is_some();
        let confidence_score = report::overall_confidence(
            &regime_analysis,
            &predictions,
            &risk_assessment,
            is_fitted,
        );
        let recommendations = report::recommendations(
            snapshot.sopr.sopr_value,
            &snapshot.behavior,
            &regime_analysis,
            &risk_assessment,
            &anomalies,
        );
        if !log.is_clean() {
            debug!("analysis finished with degraded steps");
        }

        SoprResult {
            analysis_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sopr_value: snapshot.sopr.sopr_value,
            adjusted_sopr: snapshot.sopr.adjusted_sopr,
            utxo_cohorts: snapshot.cohorts,
            behavioral_metrics: snapshot.behavior,
            regime_analysis,
            profit_loss_analysis,
            predictions,
            anomalies,
            risk_assessment,
            asopr_analysis: recent.asopr,
            sth_sopr_analysis: recent.sth,
            lth_sopr_analysis: recent.lth,
            profit_loss_distribution: recent.distribution,
            microstructure_analysis: recent.microstructure,
            volatility_analysis: recent.volatility,
            statistical_metrics: recent.statistical,
            correlation_metrics: recent.correlation,
            predictive_metrics: recent.predictive,
            behavioral_cluster,
            kalman_analysis,
            monte_carlo_analysis,
            model_performance,
            confidence_score,
            recommendations,
            metadata: AnalysisMetadata {
                rows_analyzed: data.len(),
                truncated,
                fitted: is_fitted,
                degraded_steps: log.into_steps(),
                error: None,
            },
        }
    }
}

/// Stateful convenience wrapper: a pipeline plus the parameters of its last
/// successful fit.
pub struct QuantGradeSoprModel {
    pipeline: SoprPipeline,
    fitted: Option<Arc<FittedParameters>>,
}

impl QuantGradeSoprModel {
    pub fn new(config: Config) -> Self {
        Self::from_pipeline(SoprPipeline::new(config))
    }

    pub fn from_pipeline(pipeline: SoprPipeline) -> Self {
        Self {
            pipeline,
            fitted: None,
        }
    }

    /// Fit on `data`. Failures are logged and leave the previous parameters
    /// in place.
    pub fn fit(&mut self, data: &Table) {
        match self.pipeline.fit(data) {
            Ok(params) => self.fitted = Some(Arc::new(params)),
            Err(e) => warn!("SOPR model fitting failed: {e}"),
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Shared handle to the fitted parameters, for use across threads.
    pub fn fitted(&self) -> Option<Arc<FittedParameters>> {
        self.fitted.clone()
    }

    pub fn pipeline(&self) -> &SoprPipeline {
        &self.pipeline
    }

    pub fn analyze(&self, data: &Table) -> SoprResult {
        self.pipeline.analyze(data, self.fitted.as_deref())
    }

    pub fn generate_predictions(&self, data: &Table) -> Vec<SoprPrediction> {
        self.pipeline
            .generate_predictions(data, self.fitted.as_deref())
    }

    pub fn detect_anomalies(&self, data: &Table) -> Vec<SoprAnomaly> {
        self.pipeline.detect_anomalies(data, self.fitted.as_deref())
    }
}
