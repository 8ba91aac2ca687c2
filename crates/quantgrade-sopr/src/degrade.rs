//! Step-failure bookkeeping for the analysis orchestrator.
//!
//! Every pipeline step returns `Result<T, QuantError>`. The orchestrator
//! routes each result through [`StepLog::recover`], which logs the failure,
//! records the step name, and substitutes the step's neutral default.

use quantgrade_core::error::QuantError;
use tracing::{error, warn};

/// Names of the steps that fell back to their defaults during one call.
#[derive(Debug, Default, Clone)]
pub struct StepLog {
    degraded: Vec<String>,
}

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unwrap `result`, or log, record `step`, and return `default()`.
    pub fn recover<T>(
        &mut self,
        step: &'static str,
        result: Result<T, QuantError>,
        default: impl FnOnce() -> T,
    ) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                if e.is_expected() {
                    warn!("{step}: {e}, using default");
                } else {
                    error!("{step} failed: {e}, using default");
                }
                self.degraded.push(step.to_string());
                default()
            }
        }
    }

    /// Like [`StepLog::recover`] for optional sections: failures become `None`.
    pub fn optional<T>(&mut self, step: &'static str, result: Result<T, QuantError>) -> Option<T> {
        self.recover(step, result.map(Some), || None)
    }

    pub fn is_clean(&self) -> bool {
        self.degraded.is_empty()
    }

    pub fn into_steps(self) -> Vec<String> {
        self.degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recover_records_failed_steps() {
        let mut log = StepLog::new();
        let ok = log.recover("ok_step", Ok::<_, QuantError>(3.0), || 0.5);
        let failed = log.recover(
            "short_step",
            Err::<f64, _>(QuantError::insufficient("short_step", 30, 2)),
            || 0.5,
        );
        assert_eq!(ok, 3.0);
        assert_eq!(failed, 0.5);
        assert_eq!(log.into_steps(), vec!["short_step".to_string()]);
    }

    #[test]
    fn test_optional_maps_failure_to_none() {
        let mut log = StepLog::new();
        let value: Option<u32> = log.optional("kalman", Err(QuantError::Numerical("nan".into())));
        assert!(value.is_none());
        assert!(!log.is_clean());
    }
}
