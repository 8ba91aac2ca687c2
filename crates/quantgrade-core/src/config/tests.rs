use super::*;

#[test]
fn test_defaults_match_model_constants() {
    let cfg = Config::default();
    assert_eq!(cfg.sopr.lookback_period, 365);
    assert_eq!(cfg.sopr.prediction_horizons, vec![7, 30, 90]);
    assert_eq!(cfg.sopr.anomaly_threshold, 2.5);
    assert_eq!(cfg.sopr.confidence_level, 0.95);
    assert_eq!(cfg.sopr.max_rows, 2000);
    assert_eq!(cfg.ensemble.n_estimators, 100);
    assert_eq!(cfg.ensemble.seed, 42);
    assert!(cfg.overlays.enable_kalman);
    assert!(cfg.overlays.enable_monte_carlo);
    assert_eq!(cfg.overlays.monte_carlo_simulations, 1000);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_empty_toml_uses_defaults() {
    let cfg: Config = toml::from_str("").unwrap();
    assert_eq!(cfg.general.log_level, "info");
    assert_eq!(cfg.sopr.recent_rows, 500);
    assert_eq!(cfg.cohort.realized_share, 0.06);
}

#[test]
fn test_partial_section_from_toml() {
    let toml_str = r#"
        [sopr]
        lookback_period = 120
        prediction_horizons = [1, 7]

        [overlays]
        enable_monte_carlo = false
    "#;
    let cfg: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(cfg.sopr.lookback_period, 120);
    assert_eq!(cfg.sopr.prediction_horizons, vec![1, 7]);
    assert_eq!(cfg.sopr.anomaly_threshold, 2.5);
    assert!(!cfg.overlays.enable_monte_carlo);
    assert!(cfg.overlays.enable_kalman);
}

#[test]
fn test_validate_rejects_bad_confidence() {
    let mut cfg = Config::default();
    cfg.sopr.confidence_level = 1.5;
    assert!(matches!(cfg.validate(), Err(QuantError::Config(_))));
}

#[test]
fn test_validate_rejects_empty_horizons() {
    let mut cfg = Config::default();
    cfg.sopr.prediction_horizons.clear();
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_rejects_zero_realized_share() {
    let mut cfg = Config::default();
    cfg.cohort.realized_share = 0.0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_load_missing_file_returns_defaults() {
    let cfg = load("/nonexistent/__quantgrade_missing__.toml").unwrap();
    assert_eq!(cfg.sopr.lookback_period, 365);
}

#[test]
fn test_load_invalid_toml_is_config_error() {
    let path = std::env::temp_dir().join("__quantgrade_bad_config__.toml");
    std::fs::write(&path, "[sopr\nlookback_period = ").unwrap();
    let result = load(path.to_str().unwrap());
    let _ = std::fs::remove_file(&path);
    assert!(matches!(result, Err(QuantError::Config(_))));
}
