//! The analysis result, its recommendations, and a text rendering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::anomaly::{Severity, SoprAnomaly};
use crate::behavior::BehavioralMetrics;
use crate::cohort::UtxoCohort;
use crate::enhanced::{
    AdjustedSoprAnalysis, LongTermHolderAnalysis, ProfitLossDistribution,
    ShortTermHolderAnalysis,
};
use crate::forecast::SoprPrediction;
use crate::kalman::KalmanAnalysis;
use crate::market::{
    MicrostructureAnalysis, PredictiveMetrics, StatisticalMetrics, VolatilityAnalysis,
};
use crate::model::BehavioralCluster;
use crate::monte_carlo::MonteCarloAnalysis;
use crate::pnl::ProfitLossAnalysis;
use crate::regime::{MarketRegime, MarketRegimeAnalysis};
use crate::risk::SoprRisk;
use crate::stats;

const MAX_RECOMMENDATIONS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub rows_analyzed: usize,
    /// Input was longer than `max_rows` and only the most recent rows were used.
    pub truncated: bool,
    pub fitted: bool,
    /// Steps that fell back to their defaults.
    pub degraded_steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoprResult {
    pub analysis_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub sopr_value: f64,
    pub adjusted_sopr: f64,
    pub utxo_cohorts: Vec<UtxoCohort>,
    pub behavioral_metrics: BehavioralMetrics,
    pub regime_analysis: MarketRegimeAnalysis,
    pub profit_loss_analysis: ProfitLossAnalysis,
    pub predictions: Vec<SoprPrediction>,
    pub anomalies: Vec<SoprAnomaly>,
    pub risk_assessment: SoprRisk,
    pub asopr_analysis: Option<AdjustedSoprAnalysis>,
    pub sth_sopr_analysis: Option<ShortTermHolderAnalysis>,
    pub lth_sopr_analysis: Option<LongTermHolderAnalysis>,
    pub profit_loss_distribution: Option<ProfitLossDistribution>,
    pub microstructure_analysis: Option<MicrostructureAnalysis>,
    pub volatility_analysis: Option<VolatilityAnalysis>,
    pub statistical_metrics: Option<StatisticalMetrics>,
    pub correlation_metrics: Option<BTreeMap<String, f64>>,
    pub predictive_metrics: Option<PredictiveMetrics>,
    pub behavioral_cluster: Option<BehavioralCluster>,
    pub kalman_analysis: Option<KalmanAnalysis>,
    pub monte_carlo_analysis: Option<MonteCarloAnalysis>,
    pub model_performance: Option<BTreeMap<String, f64>>,
    pub confidence_score: f64,
    pub recommendations: Vec<String>,
    pub metadata: AnalysisMetadata,
}

impl SoprResult {
    /// All-defaults result returned when the analysis itself aborted.
    pub fn fallback(error: impl Into<String>, rows_analyzed: usize) -> Self {
        Self {
            analysis_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sopr_value: 1.0,
            adjusted_sopr: 1.0,
            utxo_cohorts: Vec::new(),
            behavioral_metrics: BehavioralMetrics::default(),
            regime_analysis: MarketRegimeAnalysis::failed(),
            profit_loss_analysis: ProfitLossAnalysis::default(),
            predictions: Vec::new(),
            anomalies: Vec::new(),
            risk_assessment: SoprRisk::default(),
            asopr_analysis: None,
            sth_sopr_analysis: None,
            lth_sopr_analysis: None,
            profit_loss_distribution: None,
            microstructure_analysis: None,
            volatility_analysis: None,
            statistical_metrics: None,
            correlation_metrics: None,
            predictive_metrics: None,
            behavioral_cluster: None,
            kalman_analysis: None,
            monte_carlo_analysis: None,
            model_performance: None,
            confidence_score: 0.0,
            recommendations: vec!["Unable to generate analysis due to error".to_string()],
            metadata: AnalysisMetadata {
                rows_analyzed,
                error: Some(error.into()),
                ..Default::default()
            },
        }
    }
}

/// Mean of regime confidence, mean prediction confidence (when there are
/// predictions), inverse overall risk, and a fitted/unfitted prior.
pub fn overall_confidence(
    regime: &MarketRegimeAnalysis,
    predictions: &[SoprPrediction],
    risk: &SoprRisk,
    fitted: bool,
) -> f64 {
    let mut factors = vec![regime.confidence_score];
    if !predictions.is_empty() {
        let confidences: Vec<f64> = predictions.iter().map(|p| p.model_confidence).collect();
        factors.push(stats::mean(&confidences));
    }
    factors.push(1.0 - risk.overall_risk);
    factors.push(if fitted { 0.8 } else { 0.3 });
    stats::clamp01(stats::mean(&factors))
}

pub fn recommendations(
    sopr_value: f64,
    behavior: &BehavioralMetrics,
    regime: &MarketRegimeAnalysis,
    risk: &SoprRisk,
    anomalies: &[SoprAnomaly],
) -> Vec<String> {
    let mut out = Vec::new();
    out.push(
        if sopr_value > 1.05 {
            "SOPR indicates profit-taking activity - monitor for potential selling pressure"
        } else if sopr_value < 0.95 {
            "SOPR shows loss realization - potential accumulation opportunity"
        } else {
            "SOPR in neutral range - balanced market conditions"
        }
        .to_string(),
    );

    if behavior.euphoria_score > 0.7 {
        out.push("High euphoria detected - exercise caution, consider profit-taking".to_string());
    } else if behavior.capitulation_score > 0.7 {
        out.push("Capitulation signals present - potential buying opportunity".to_string());
    }
    if behavior.hodling_strength > 0.8 {
        out.push("Strong hodling behavior - bullish long-term signal".to_string());
    } else if behavior.hodling_strength < 0.3 {
        out.push("Weak hodling - increased distribution risk".to_string());
    }

    match regime.current_regime {
        MarketRegime::BullMarket => out.push(
            "Bull market regime - consider position scaling and profit targets".to_string(),
        ),
        MarketRegime::BearMarket => out.push(
            "Bear market regime - focus on risk management and accumulation".to_string(),
        ),
        MarketRegime::Transition => out.push(
            "Market in transition - maintain flexibility and monitor closely".to_string(),
        ),
        _ => {}
    }

    if risk.overall_risk > 0.7 {
        out.push(
            "High risk environment - reduce position sizes and increase monitoring".to_string(),
        );
    } else if risk.overall_risk < 0.3 {
        out.push("Low risk environment - consider increasing exposure".to_string());
    }

    for anomaly in anomalies.iter().filter(|a| a.severity >= Severity::High) {
        let implication = anomaly
            .market_implications
            .first()
            .map(String::as_str)
            .unwrap_or("Monitor closely");
        out.push(format!("ALERT: {} detected - {implication}", anomaly.anomaly_type));
    }

    out.truncate(MAX_RECOMMENDATIONS);
    out
}

/// Plain-text advisory block for terminals and chat.
pub fn format_report(result: &SoprResult) -> String {
    let predictions = if result.predictions.is_empty() {
        "  none (model not fitted)".to_string()
    } else {
        result
            .predictions
            .iter()
            .map(|p| {
                format!(
                    "  {}d: {:.4} [{:.4}, {:.4}] {} ({:.0}%)",
                    p.prediction_horizon,
                    p.predicted_sopr,
                    p.confidence_interval.0,
                    p.confidence_interval.1,
                    p.market_scenario,
                    p.model_confidence * 100.0,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    let anomalies = if result.anomalies.is_empty() {
        "none".to_string()
    } else {
        result
            .anomalies
            .iter()
            .map(|a| format!("{} ({}, {:.2})", a.anomaly_type, a.severity, a.anomaly_score))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let recommendations = result
        .recommendations
        .iter()
        .enumerate()
        .map(|(i, r)| format!("  {}. {r}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    let regime = &result.regime_analysis;

    format!(
        "[SOPR ADVISORY - NOT FINANCIAL ADVICE]\n\
         SOPR: {:.4} | Adjusted: {:.4}\n\
         Behavior: {} | Regime: {} (strength {:.2}, next: {})\n\
         Risk: {:.0}% | Confidence: {:.0}%\n\
         Predictions:\n{predictions}\n\
         Anomalies: {anomalies}\n\
         Recommendations:\n{recommendations}\n\
         [END SOPR ADVISORY]",
        result.sopr_value,
        result.adjusted_sopr,
        result.behavioral_metrics.behavioral_regime,
        regime.current_regime,
        regime.regime_strength,
        regime.next_regime_prediction,
        result.risk_assessment.overall_risk * 100.0,
        result.confidence_score * 100.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_carries_error() {
        let r = SoprResult::fallback("boom", 3);
        assert_eq!(r.metadata.error.as_deref(), Some("boom"));
        assert_eq!(r.metadata.rows_analyzed, 3);
        assert_eq!(r.regime_analysis.current_regime, MarketRegime::Unknown);
        assert_eq!(
            r.recommendations,
            vec!["Unable to generate analysis due to error".to_string()]
        );
    }

    #[test]
    fn test_unfitted_confidence() {
        let regime = MarketRegimeAnalysis::unfitted();
        let risk = SoprRisk::default();
        // (0.5 + 0.5 + 0.3) / 3
        let c = overall_confidence(&regime, &[], &risk, false);
        assert!((c - 1.3 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_neutral_recommendation_first() {
        let recs = recommendations(
            1.0,
            &BehavioralMetrics::default(),
            &MarketRegimeAnalysis::unfitted(),
            &SoprRisk::default(),
            &[],
        );
        assert_eq!(recs[0], "SOPR in neutral range - balanced market conditions");
        assert_eq!(recs.len(), 1);
    }

    #[test]
    fn test_report_block_delimiters() {
        let text = format_report(&SoprResult::fallback("boom", 0));
        assert!(text.starts_with("[SOPR ADVISORY - NOT FINANCIAL ADVICE]"));
        assert!(text.ends_with("[END SOPR ADVISORY]"));
        assert!(text.contains("none (model not fitted)"));
    }
}
