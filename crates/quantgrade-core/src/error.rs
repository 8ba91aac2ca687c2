use thiserror::Error;

/// Top-level error type for quantgrade.
#[derive(Debug, Error)]
pub enum QuantError {
    /// Not enough rows for a computation step.
    #[error("insufficient data for {step}: need {needed} rows, got {got}")]
    InsufficientData {
        step: &'static str,
        needed: usize,
        got: usize,
    },

    /// A required input column is absent.
    #[error("missing column: {0}")]
    MissingColumn(&'static str),

    /// A step needs fitted parameters but none were supplied.
    #[error("model not fitted")]
    NotFitted,

    /// Non-finite intermediate or singular system.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Learner training or inference failure.
    #[error("model error: {0}")]
    Model(String),

    /// Malformed input table.
    #[error("table error: {0}")]
    Table(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QuantError {
    /// Whether this failure is an expected consequence of short or sparse input.
    ///
    /// Expected failures are logged at `warn`, everything else at `error`.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::InsufficientData { .. } | Self::MissingColumn(_) | Self::NotFitted
        )
    }

    /// Shorthand for [`QuantError::InsufficientData`].
    pub fn insufficient(step: &'static str, needed: usize, got: usize) -> Self {
        Self::InsufficientData { step, needed, got }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_errors() {
        assert!(QuantError::insufficient("anomalies", 30, 10).is_expected());
        assert!(QuantError::MissingColumn("price").is_expected());
        assert!(!QuantError::Numerical("nan".into()).is_expected());
    }

    #[test]
    fn test_insufficient_message() {
        let err = QuantError::insufficient("kalman", 10, 3);
        assert_eq!(
            err.to_string(),
            "insufficient data for kalman: need 10 rows, got 3"
        );
    }
}
