//! Scheduler errors.

use doccron_store::StoreError;
use thiserror::Error;

use crate::interval::IntervalError;

/// Scheduler error types.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The document collection failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// An interval expression could not be parsed.
    #[error("Invalid interval: {0}")]
    Interval(#[from] IntervalError),

    /// A job document carries a field the scheduler cannot use.
    #[error("Invalid {field} on job {job_id}: {reason}")]
    InvalidJobField {
        job_id: String,
        field: String,
        reason: String,
    },

    /// A job handler callback failed.
    #[error("Handler failed: {0}")]
    Handler(String),

    /// Invalid scheduler configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SchedulerError {
    /// Wrap any displayable error as a handler failure.
    pub fn handler(err: impl std::fmt::Display) -> Self {
        Self::Handler(err.to_string())
    }

    /// Whether the error came from the document collection.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
