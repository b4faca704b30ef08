//! Jira Replicator Library
//!
//! Triggers Jira Cloud backups, waits for them to finish, and streams the
//! archive into S3 as a multipart upload, on a fixed cadence.

pub mod commands;
pub mod config;
pub mod daemon;
pub mod jira;
pub mod orchestrator;
pub mod rate_limit;
pub mod reporter;
pub mod sink;
pub mod source;
pub mod storage;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use orchestrator::{BackupOrchestrator, CyclePhase, OrchestratorSettings};
pub use utils::errors::ReplicatorError;
pub type Result<T> = std::result::Result<T, ReplicatorError>;
