//! Market regime classification.
//!
//! The regime label comes from a k-means model fitted on scaled feature
//! vectors; strength, duration and transition probability are separate
//! heuristics on prices and behavior.

use quantgrade_core::error::QuantError;
use quantgrade_core::table::{Column, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::behavior::BehavioralMetrics;
use crate::cluster::KMeans;
use crate::features::{MOMENTUM, VOLATILITY};
use crate::{metrics, stats};

const STRENGTH_WINDOW: usize = 30;

/// Coarse market state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    BullMarket,
    BearMarket,
    Sideways,
    Transition,
    Unknown,
}

impl MarketRegime {
    /// Typical duration in days.
    pub fn typical_duration(&self) -> u32 {
        match self {
            Self::BullMarket => 180,
            Self::BearMarket => 365,
            Self::Sideways => 90,
            Self::Transition => 30,
            Self::Unknown => 60,
        }
    }

    /// Most likely successor once a transition is under way.
    pub fn successor(&self) -> Self {
        match self {
            Self::BullMarket | Self::BearMarket => Self::Sideways,
            Self::Sideways => Self::Transition,
            Self::Transition => Self::BullMarket,
            Self::Unknown => Self::Sideways,
        }
    }

    pub fn supporting_indicators(&self) -> Vec<String> {
        let items: &[&str] = match self {
            Self::BullMarket => &["Rising prices", "Profit taking activity", "Strong hodling"],
            Self::BearMarket => &["Declining prices", "Loss realization", "Weak hands selling"],
            Self::Sideways => &["Range-bound prices", "Low volatility", "Balanced behavior"],
            Self::Transition | Self::Unknown => &["Changing dynamics", "Mixed signals", "Uncertainty"],
        };
        items.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BullMarket => write!(f, "bull_market"),
            Self::BearMarket => write!(f, "bear_market"),
            Self::Sideways => write!(f, "sideways"),
            Self::Transition => write!(f, "transition"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRegimeAnalysis {
    pub current_regime: MarketRegime,
    pub regime_strength: f64,
    /// Estimated duration in days.
    pub regime_duration: u32,
    pub transition_probability: f64,
    pub supporting_indicators: Vec<String>,
    pub regime_characteristics: BTreeMap<String, f64>,
    pub next_regime_prediction: MarketRegime,
    pub confidence_score: f64,
}

impl MarketRegimeAnalysis {
    /// Result when no fitted clusterer is available.
    pub fn unfitted() -> Self {
        Self {
            current_regime: MarketRegime::Sideways,
            regime_strength: 0.5,
            regime_duration: 30,
            transition_probability: 0.3,
            supporting_indicators: Vec::new(),
            regime_characteristics: BTreeMap::new(),
            next_regime_prediction: MarketRegime::Sideways,
            confidence_score: 0.5,
        }
    }

    /// Result when classification itself failed.
    pub fn failed() -> Self {
        Self {
            current_regime: MarketRegime::Unknown,
            regime_strength: 0.0,
            regime_duration: 0,
            transition_probability: 0.5,
            supporting_indicators: Vec::new(),
            regime_characteristics: BTreeMap::new(),
            next_regime_prediction: MarketRegime::Unknown,
            confidence_score: 0.0,
        }
    }
}

/// K-means clusterer plus the semantic label of each cluster.
#[derive(Debug, Clone)]
pub struct RegimeModel {
    kmeans: KMeans,
    labels: Vec<MarketRegime>,
}

impl RegimeModel {
    /// Cluster the scaled training vectors and name each cluster by its
    /// centroid: highest momentum is bull, lowest is bear, and of the rest
    /// the calmest is sideways while the others are transition.
    pub fn fit(scaled: &[Vec<f64>], k: usize, seed: u64) -> Result<Self, QuantError> {
        let needed = MOMENTUM.max(VOLATILITY) + 1;
        if let Some(row) = scaled.iter().find(|r| r.len() < needed) {
            return Err(QuantError::Model(format!(
                "regime features need {needed} dimensions, got {}",
                row.len()
            )));
        }
        let kmeans = KMeans::fit(scaled, k, seed)?;
        let labels = label_centroids(kmeans.centroids());
        Ok(Self { kmeans, labels })
    }

    pub fn predict(&self, scaled: &[f64]) -> MarketRegime {
        self.labels
            .get(self.kmeans.predict(scaled))
            .copied()
            .unwrap_or(MarketRegime::Unknown)
    }

    pub fn labels(&self) -> &[MarketRegime] {
        &self.labels
    }
}

fn label_centroids(centroids: &[Vec<f64>]) -> Vec<MarketRegime> {
    let k = centroids.len();
    let mut labels = vec![MarketRegime::Transition; k];
    if k == 0 {
        return labels;
    }
    if k == 1 {
        labels[0] = MarketRegime::Sideways;
        return labels;
    }
    let mut by_momentum: Vec<usize> = (0..k).collect();
    by_momentum.sort_by(|&a, &b| centroids[a][MOMENTUM].total_cmp(&centroids[b][MOMENTUM]));
    let bear = by_momentum[0];
    let bull = by_momentum[k - 1];
    labels[bull] = MarketRegime::BullMarket;
    labels[bear] = MarketRegime::BearMarket;
    if let Some(calmest) = by_momentum[1..k - 1]
        .iter()
        .copied()
        .min_by(|&a, &b| centroids[a][VOLATILITY].total_cmp(&centroids[b][VOLATILITY]))
    {
        labels[calmest] = MarketRegime::Sideways;
    }
    labels
}

fn recent_changes(data: &Table) -> Option<Vec<f64>> {
    (data.len() >= STRENGTH_WINDOW && data.has(Column::Price))
        .then(|| metrics::recent_price_changes(data, STRENGTH_WINDOW))
}

pub fn regime_strength(data: &Table, regime: MarketRegime) -> f64 {
    let Some(changes) = recent_changes(data) else {
        return 0.5;
    };
    match regime {
        MarketRegime::BullMarket => stats::clamp01(stats::mean(&changes) * 10.0),
        MarketRegime::BearMarket => stats::clamp01(stats::mean(&changes).abs() * 10.0),
        MarketRegime::Sideways => stats::clamp01(1.0 - stats::sample_std(&changes) * 20.0),
        _ => 0.5,
    }
}

pub fn transition_probability(behavior: &BehavioralMetrics) -> f64 {
    let extreme = behavior
        .euphoria_score
        .max(behavior.capitulation_score)
        .max(behavior.panic_selling_score);
    stats::clamp01(extreme * 0.8)
}

pub fn characteristics(behavior: &BehavioralMetrics) -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("profit_taking".to_string(), behavior.profit_taking_intensity),
        ("loss_realization".to_string(), behavior.loss_realization_rate),
        ("hodling_strength".to_string(), behavior.hodling_strength),
        ("sentiment_alignment".to_string(), behavior.sentiment_alignment),
    ])
}

/// Classify the current regime. `scaled` is the scaled current feature vector.
pub fn analyze(
    data: &Table,
    behavior: &BehavioralMetrics,
    scaled: &[f64],
    model: Option<&RegimeModel>,
) -> Result<MarketRegimeAnalysis, QuantError> {
    let Some(model) = model else {
        return Ok(MarketRegimeAnalysis::unfitted());
    };
    if scaled.iter().any(|x| !x.is_finite()) {
        return Err(QuantError::Numerical("non-finite regime features".into()));
    }
    let current = model.predict(scaled);
    let strength = regime_strength(data, current);
    let transition = transition_probability(behavior);
    let next = if transition < 0.3 {
        current
    } else {
        current.successor()
    };
    Ok(MarketRegimeAnalysis {
        current_regime: current,
        regime_strength: strength,
        regime_duration: current.typical_duration(),
        transition_probability: transition,
        supporting_indicators: current.supporting_indicators(),
        regime_characteristics: characteristics(behavior),
        next_regime_prediction: next,
        confidence_score: stats::clamp01(strength * (1.0 - transition)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn centroid(momentum: f64, volatility: f64) -> Vec<f64> {
        let mut c = vec![0.0; 13];
        c[MOMENTUM] = momentum;
        c[VOLATILITY] = volatility;
        c
    }

    #[test]
    fn test_fit_rejects_narrow_features() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 1.0]).collect();
        let err = RegimeModel::fit(&rows, 4, 42).unwrap_err();
        assert!(matches!(err, QuantError::Model(_)), "got {err}");
    }

    #[test]
    fn test_centroid_labels() {
        let centroids = vec![
            centroid(0.0, 2.0),
            centroid(1.0, 1.0),
            centroid(-1.0, 1.0),
            centroid(0.1, 0.2),
        ];
        assert_eq!(
            label_centroids(&centroids),
            vec![
                MarketRegime::Transition,
                MarketRegime::BullMarket,
                MarketRegime::BearMarket,
                MarketRegime::Sideways,
            ]
        );
    }

    #[test]
    fn test_unfitted_is_sideways() {
        let table = Table::default();
        let r = analyze(&table, &BehavioralMetrics::default(), &[0.0; 13], None).unwrap();
        assert_eq!(r.current_regime, MarketRegime::Sideways);
        assert_eq!(r.regime_strength, 0.5);
        assert_eq!(r.regime_duration, 30);
        assert_eq!(r.transition_probability, 0.3);
        assert_eq!(r.confidence_score, 0.5);
    }

    #[test]
    fn test_fitted_model_labels_uptrend_bull() {
        let mut rows = Vec::new();
        for i in 0..40 {
            let j = (i as f64 * 0.3).sin() * 0.05;
            rows.push(centroid(5.0 + j, 0.5));
            rows.push(centroid(-5.0 + j, 0.5));
            rows.push(centroid(j, 0.1));
            rows.push(centroid(j, 6.0));
        }
        let model = RegimeModel::fit(&rows, 4, 42).unwrap();
        assert_eq!(model.predict(&centroid(5.0, 0.5)), MarketRegime::BullMarket);
        assert_eq!(model.predict(&centroid(-5.0, 0.5)), MarketRegime::BearMarket);
        assert_eq!(model.predict(&centroid(0.0, 0.1)), MarketRegime::Sideways);
        assert_eq!(model.predict(&centroid(0.0, 6.0)), MarketRegime::Transition);
    }

    #[test]
    fn test_strength_and_transition() {
        let prices: Vec<f64> = (0..40).map(|i| 100.0 * 1.05f64.powi(i)).collect();
        let table = Table::from_columns([(Column::Price, prices)]).unwrap();
        assert!((regime_strength(&table, MarketRegime::BullMarket) - 0.5).abs() < 1e-9);
        assert!((regime_strength(&table, MarketRegime::BearMarket) - 0.5).abs() < 1e-9);
        assert!(regime_strength(&table, MarketRegime::Sideways) > 0.999);
        assert_eq!(regime_strength(&table, MarketRegime::Transition), 0.5);
        let behavior = BehavioralMetrics {
            euphoria_score: 0.5,
            ..Default::default()
        };
        assert!((transition_probability(&behavior) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_successor_chain() {
        assert_eq!(MarketRegime::BullMarket.successor(), MarketRegime::Sideways);
        assert_eq!(MarketRegime::Sideways.successor(), MarketRegime::Transition);
        assert_eq!(MarketRegime::Transition.successor(), MarketRegime::BullMarket);
    }
}
