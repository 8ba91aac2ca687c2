//! Default value functions used by serde for config deserialization.

pub fn default_name() -> String {
    "quantgrade".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_true() -> bool {
    true
}

pub fn default_lookback_period() -> usize {
    365
}

pub fn default_prediction_horizons() -> Vec<u32> {
    vec![7, 30, 90]
}

pub fn default_anomaly_threshold() -> f64 {
    2.5
}

pub fn default_confidence_level() -> f64 {
    0.95
}

pub fn default_max_rows() -> usize {
    2000
}

pub fn default_recent_rows() -> usize {
    500
}

pub fn default_training_window() -> usize {
    30
}

pub fn default_n_estimators() -> usize {
    100
}

pub fn default_max_depth() -> usize {
    8
}

pub fn default_min_samples_leaf() -> usize {
    2
}

pub fn default_learning_rate() -> f64 {
    0.1
}

pub fn default_boosting_depth() -> usize {
    3
}

pub fn default_alpha() -> f64 {
    1.0
}

pub fn default_l1_ratio() -> f64 {
    0.5
}

pub fn default_clusters() -> usize {
    4
}

pub fn default_isolation_trees() -> usize {
    100
}

pub fn default_contamination() -> f64 {
    0.1
}

pub fn default_seed() -> u64 {
    42
}

pub fn default_em_iterations() -> usize {
    5
}

pub fn default_kalman_max_observations() -> usize {
    500
}

pub fn default_simulations() -> usize {
    1000
}

pub fn default_realized_share() -> f64 {
    0.06
}
