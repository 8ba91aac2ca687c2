use crate::{cohort::CohortFlows, error::QuantError, table::Table};

/// Cohort data source trait.
///
/// The pipeline only consumes per-cohort flows; whether they come from a
/// deterministic simulator, a UTXO index, or a test fixture is up to the
/// implementation. Implementations must return one entry per cohort they
/// know about and must not depend on hidden global state.
pub trait CohortDataSource: Send + Sync {
    /// Human-readable source name.
    fn name(&self) -> &str;

    /// Produce cohort flows for the given (already truncated) table.
    fn cohort_flows(&self, data: &Table) -> Result<Vec<CohortFlows>, QuantError>;
}
