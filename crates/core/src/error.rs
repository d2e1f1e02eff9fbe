use thiserror::Error;

/// Conditions the engine reports instead of fabricating a result.
///
/// Per-ticker data failures are not represented here: they degrade the affected
/// [`Snapshot`](crate::domain::snapshot::Snapshot) and never abort a batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("insufficient price data: need at least {required} aligned observations, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error(
        "allocation is infeasible: {assets} assets capped at {max_weight} each cannot sum to 1"
    )]
    Infeasible { assets: usize, max_weight: f64 },

    #[error("no assets to allocate")]
    EmptyUniverse,

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl EngineError {
    /// True for the two hard failures a caller is expected to act on (fetch more history or
    /// relax the weight cap), as opposed to programming or request errors.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientData { .. } | EngineError::Infeasible { .. }
        )
    }
}
