use super::*;
use anomaly::{AnomalyType, Severity};
use cohort::FixedCohortSource;
use quantgrade_core::cohort::{CohortFlows, CohortKind};
use quantgrade_core::config::{EnsembleConfig, SoprConfig};
use quantgrade_core::table::Row;

/// Rising market: price climbs from 100 to 500, coins are spent above cost.
fn rising_market(n: usize) -> Table {
    let price: Vec<f64> = (0..n)
        .map(|i| 100.0 + 400.0 * i as f64 / n as f64 + (i as f64 * 0.3).sin() * 2.0)
        .collect();
    let cost: Vec<f64> = price
        .iter()
        .enumerate()
        .map(|(i, p)| p * (0.85 + (i as f64 * 0.17).cos() * 0.02))
        .collect();
    let sopr: Vec<f64> = price.iter().zip(&cost).map(|(p, c)| p / c).collect();
    let volume: Vec<f64> = (0..n)
        .map(|i| 1e6 * (1.0 + (i as f64 * 0.21).sin() * 0.3))
        .collect();
    Table::from_columns([
        (Column::Price, price),
        (Column::CostBasis, cost),
        (Column::Sopr, sopr),
        (Column::Volume, volume),
    ])
    .unwrap()
}

fn small_config() -> Config {
    Config {
        sopr: SoprConfig {
            lookback_period: 90,
            ..Default::default()
        },
        ensemble: EnsembleConfig {
            n_estimators: 10,
            isolation_trees: 20,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Result as JSON with the per-call identity stripped.
fn comparable(result: &SoprResult) -> serde_json::Value {
    let mut value = serde_json::to_value(result).unwrap();
    let object = value.as_object_mut().unwrap();
    object.remove("analysis_id");
    object.remove("timestamp");
    value
}

#[test]
fn test_garbage_input_never_panics() {
    let rows = vec![
        Row {
            price: Some(f64::NAN),
            cost_basis: Some(0.0),
            ..Default::default()
        },
        Row {
            price: Some(-5.0),
            cost_basis: Some(f64::INFINITY),
            volume: Some(-1.0),
            ..Default::default()
        },
        Row {
            realized_price: Some(3.0),
            spent_price: Some(-2.0),
            ..Default::default()
        },
    ];
    let pipeline = SoprPipeline::new(Config::default());
    let result = pipeline.analyze(&Table::from_rows(&rows), None);
    assert!(result.metadata.error.is_none(), "steps must degrade, not abort");
    assert!(result.sopr_value.is_finite());
    assert!((0.0..=1.0).contains(&result.confidence_score));
}

#[test]
fn test_empty_and_single_row_tables() {
    let pipeline = SoprPipeline::new(Config::default());

    let empty = pipeline.analyze(&Table::default(), None);
    assert_eq!(empty.sopr_value, 1.0);
    assert_eq!(empty.metadata.rows_analyzed, 0);

    let single = Table::from_columns([
        (Column::Price, vec![110.0]),
        (Column::CostBasis, vec![100.0]),
    ])
    .unwrap();
    let result = pipeline.analyze(&single, None);
    assert!((result.sopr_value - 1.1).abs() < 1e-12);
    assert_eq!(result.adjusted_sopr, result.sopr_value);
    assert!(result.predictions.is_empty());
    assert!(result.kalman_analysis.is_none());
    assert!(result.monte_carlo_analysis.is_none());
    assert!(!result.metadata.fitted);
    assert!(result
        .metadata
        .degraded_steps
        .contains(&"anomalies".to_string()));
}

#[test]
fn test_repeated_analysis_is_deterministic() {
    let data = rising_market(120);
    let pipeline = SoprPipeline::new(Config::default());
    let a = pipeline.analyze(&data, None);
    let b = pipeline.analyze(&data, None);
    assert_ne!(a.analysis_id, b.analysis_id);
    assert_eq!(comparable(&a), comparable(&b));
}

#[test]
fn test_fit_on_short_history_stays_unfitted() {
    let mut model = QuantGradeSoprModel::new(Config::default());
    let data = rising_market(10);
    model.fit(&data);
    assert!(!model.is_fitted());
    assert!(model.fitted().is_none());
    assert!(model.generate_predictions(&data).is_empty());

    let result = model.analyze(&data);
    assert!(!result.metadata.fitted);
    assert!(result.behavioral_cluster.is_none());
    assert!(result.model_performance.is_none());
}

#[test]
fn test_sopr_spike_is_critical() {
    let mut sopr: Vec<f64> = (0..59)
        .map(|i| if i % 2 == 0 { 0.99 } else { 1.01 })
        .collect();
    sopr.push(2.0);
    let data = Table::from_columns([(Column::Sopr, sopr)]).unwrap();
    let pipeline = SoprPipeline::new(Config::default());

    let anomalies = pipeline.detect_anomalies(&data, None);
    let spike = anomalies
        .iter()
        .find(|a| a.anomaly_type == AnomalyType::ExtremeProfitTaking)
        .expect("spike should be flagged");
    assert_eq!(spike.severity, Severity::Critical);
    assert!(spike.is_anomaly);

    let result = pipeline.analyze(&data, None);
    assert!(result
        .recommendations
        .iter()
        .any(|r| r.starts_with("ALERT: extreme_profit_taking detected")));
}

#[test]
fn test_rising_market_analysis() {
    let data = rising_market(400);
    let pipeline = SoprPipeline::new(Config::default());
    let result = pipeline.analyze(&data, None);

    assert!(result.sopr_value > 1.05, "got {}", result.sopr_value);
    assert!(result.recommendations[0].starts_with("SOPR indicates profit-taking"));
    assert!(result.recommendations.len() <= 10);
    assert_eq!(result.utxo_cohorts.len(), 5);
    assert!(result.asopr_analysis.is_some());
    assert!(result.sth_sopr_analysis.is_some());
    assert!(result.lth_sopr_analysis.is_some());
    assert!(result.microstructure_analysis.is_some());
    assert!(result.correlation_metrics.is_some());
    assert!(result.kalman_analysis.is_some());
    assert!(result.monte_carlo_analysis.is_some());
    // Unfitted regime analysis falls back to sideways.
    assert_eq!(
        result.regime_analysis.current_regime,
        regime::MarketRegime::Sideways
    );
    assert!((0.0..=1.0).contains(&result.confidence_score));
    assert!(!result.metadata.truncated);
}

#[test]
fn test_monotonic_market_at_breakeven() {
    let prices: Vec<f64> = (0..400).map(|i| 10_000.0 * 1.002f64.powi(i)).collect();
    let data = Table::from_columns([
        (Column::Price, prices),
        (Column::Sopr, vec![1.0; 400]),
    ])
    .unwrap();
    let result = SoprPipeline::new(Config::default()).analyze(&data, None);

    assert!(result.metadata.error.is_none());
    assert_eq!(result.metadata.rows_analyzed, 400);
    assert_eq!(result.sopr_value, 1.0);
    assert_eq!(result.behavioral_metrics.capitulation_score, 0.0);
    assert!(!result
        .anomalies
        .iter()
        .any(|a| a.anomaly_type == AnomalyType::MassCapitulation
            || a.anomaly_type == AnomalyType::ExtremeProfitTaking));
    for step in [
        "utxo_cohorts",
        "capitulation_score",
        "euphoria_score",
        "panic_selling_score",
        "regime_analysis",
        "profit_loss_analysis",
        "anomalies",
        "risk_assessment",
        "kalman_analysis",
        "monte_carlo_analysis",
    ] {
        assert!(
            !result.metadata.degraded_steps.iter().any(|s| s == step),
            "{step} degraded: {:?}",
            result.metadata.degraded_steps
        );
    }

    // A flat series passes through the smoother; paths are still simulated.
    let kalman = result.kalman_analysis.expect("kalman overlay at 400 rows");
    assert!(!kalman.smoothed);
    assert_eq!(kalman.filtered_values.len(), 400);
    let monte_carlo = result.monte_carlo_analysis.expect("monte carlo overlay at 400 rows");
    assert!(monte_carlo.simulated);
}

#[test]
fn test_fit_then_analyze() {
    let data = rising_market(150);
    let mut model = QuantGradeSoprModel::new(small_config());
    model.fit(&data);
    assert!(model.is_fitted());

    let predictions = model.generate_predictions(&data);
    assert_eq!(predictions.len(), 3);
    let horizons: Vec<u32> = predictions.iter().map(|p| p.prediction_horizon).collect();
    assert_eq!(horizons, vec![7, 30, 90]);
    for p in &predictions {
        assert!(p.confidence_interval.0 <= p.predicted_sopr);
        assert!(p.predicted_sopr <= p.confidence_interval.1);
        assert!((0.0..=1.0).contains(&p.model_confidence));
        assert_eq!(p.model_predictions.len(), 4);
    }

    let result = model.analyze(&data);
    assert!(result.metadata.fitted);
    assert_eq!(result.predictions.len(), 3);
    assert!(result.model_performance.is_some());
    assert_ne!(
        result.regime_analysis.current_regime,
        regime::MarketRegime::Unknown
    );
}

#[test]
fn test_fitted_parameters_shared_across_threads() {
    let data = rising_market(150);
    let pipeline = SoprPipeline::new(small_config());
    let fitted = Arc::new(pipeline.fit(&data).unwrap());
    let pipeline = Arc::new(pipeline);

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            let fitted = Arc::clone(&fitted);
            let data = data.clone();
            std::thread::spawn(move || {
                pipeline.generate_predictions(&data, Some(fitted.as_ref()))
            })
        })
        .collect();
    let outputs: Vec<Vec<SoprPrediction>> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn test_fit_rejects_invalid_config() {
    let mut config = small_config();
    config.sopr.training_window = 0;
    let err = SoprPipeline::new(config).fit(&rising_market(150)).unwrap_err();
    assert!(matches!(err, QuantError::Config(_)), "got {err}");

    let mut config = small_config();
    config.sopr.training_window = 0;
    let mut model = QuantGradeSoprModel::new(config);
    model.fit(&rising_market(150));
    assert!(!model.is_fitted());
}

#[test]
fn test_long_input_is_truncated() {
    let config = Config {
        sopr: SoprConfig {
            max_rows: 100,
            ..Default::default()
        },
        ..Default::default()
    };
    let result = SoprPipeline::new(config).analyze(&rising_market(150), None);
    assert!(result.metadata.truncated);
    assert_eq!(result.metadata.rows_analyzed, 100);
}

#[test]
fn test_overlays_follow_config() {
    let mut config = Config::default();
    config.overlays.enable_kalman = false;
    config.overlays.enable_monte_carlo = false;
    let result = SoprPipeline::new(config).analyze(&rising_market(120), None);
    assert!(result.kalman_analysis.is_none());
    assert!(result.monte_carlo_analysis.is_none());

    let result = SoprPipeline::new(Config::default())
        .with_smoother(Some(Box::new(kalman::PassthroughSmoother)))
        .analyze(&rising_market(120), None);
    let kalman = result.kalman_analysis.unwrap();
    assert!(!kalman.smoothed);
}

#[test]
fn test_custom_cohort_source() {
    let flows: Vec<CohortFlows> = CohortKind::ALL
        .iter()
        .map(|&kind| CohortFlows {
            kind,
            total_value: 1000.0,
            realized_profit: 30.0,
            realized_loss: -10.0,
        })
        .collect();
    let pipeline = SoprPipeline::new(Config::default())
        .with_source(Box::new(FixedCohortSource::new(flows)));
    let result = pipeline.analyze(&rising_market(60), None);
    assert_eq!(result.utxo_cohorts.len(), 5);
    assert!(result
        .utxo_cohorts
        .iter()
        .all(|c| (c.profit_ratio - 0.75).abs() < 1e-12));
    assert!(!result
        .metadata
        .degraded_steps
        .contains(&"utxo_cohorts".to_string()));
}

#[test]
fn test_empty_cohort_source_degrades() {
    let pipeline = SoprPipeline::new(Config::default())
        .with_source(Box::new(FixedCohortSource::new(Vec::new())));
    let result = pipeline.analyze(&rising_market(60), None);
    assert!(result.utxo_cohorts.is_empty());
    assert!(result
        .metadata
        .degraded_steps
        .contains(&"utxo_cohorts".to_string()));
    assert!(result.metadata.error.is_none());
}
