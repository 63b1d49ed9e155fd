//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler already running")]
    AlreadyRunning,

    #[error("scheduler stopped")]
    Stopped,

    #[error("invalid scheduler settings: {0}")]
    InvalidSettings(String),

    #[error("state store error: {0}")]
    State(#[from] sentinel_state::StateError),

    #[error("repair error: {0}")]
    Repair(#[from] sentinel_repair::RepairError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
