//! UTXO cohort identities and the raw flows a data source reports for them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Named holder cohort, bucketed by coin age or holder size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CohortKind {
    ShortTerm,
    MediumTerm,
    LongTerm,
    Whale,
    Retail,
}

impl CohortKind {
    pub const ALL: [CohortKind; 5] = [
        CohortKind::ShortTerm,
        CohortKind::MediumTerm,
        CohortKind::LongTerm,
        CohortKind::Whale,
        CohortKind::Retail,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::MediumTerm => "medium_term",
            Self::LongTerm => "long_term",
            Self::Whale => "whale",
            Self::Retail => "retail",
        }
    }

    /// Coin age range in days. Size-based cohorts span every age.
    pub fn age_range(&self) -> (u32, u32) {
        match self {
            Self::ShortTerm => (0, 30),
            Self::MediumTerm => (30, 365),
            Self::LongTerm => (365, 1825),
            Self::Whale | Self::Retail => (0, 9999),
        }
    }
}

impl fmt::Display for CohortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value and realized flows of one cohort over the analysis window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CohortFlows {
    pub kind: CohortKind,
    /// Total value held by the cohort.
    pub total_value: f64,
    /// Realized profit (non-negative).
    pub realized_profit: f64,
    /// Realized loss (non-positive).
    pub realized_loss: f64,
}

impl CohortFlows {
    /// Total realized value, profit plus absolute loss.
    pub fn realized(&self) -> f64 {
        self.realized_profit + self.realized_loss.abs()
    }
}
