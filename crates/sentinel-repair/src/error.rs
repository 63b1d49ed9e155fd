//! Error types for the repair engine.

use thiserror::Error;

use sentinel_state::StateError;

pub type RepairResult<T> = Result<T, RepairError>;

#[derive(Debug, Error)]
pub enum RepairError {
    /// The requested strategy cannot be executed.
    #[error("invalid repair strategy: {0}")]
    InvalidStrategy(String),

    #[error(transparent)]
    Storage(#[from] StateError),
}
