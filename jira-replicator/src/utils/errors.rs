//! Error types for the replicator.
//!
//! Rate limiting is a distinguished variant so the orchestrator can match on it
//! instead of inspecting the error text.

use crate::rate_limit::RateLimitCondition;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplicatorError {
    #[error("{0}")]
    RateLimited(RateLimitCondition),

    #[error("Unable to get backup status: {0}")]
    StatusQuery(String),

    #[error("Unable to create backup: {0}")]
    Trigger(String),

    #[error("Backup job finished with status {0}")]
    JobFailed(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Timed out while {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Shutdown requested")]
    Shutdown,
}

impl ReplicatorError {
    /// Whether this error ends the run. Rate limits are waited out and
    /// shutdown is a clean stop, everything else is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ReplicatorError::RateLimited(_) | ReplicatorError::Shutdown
        )
    }
}

pub type Result<T> = std::result::Result<T, ReplicatorError>;
