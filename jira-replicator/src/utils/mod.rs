//! Utility modules for the replicator.

pub mod clock;
pub mod errors;
pub mod logger;

pub use errors::{ReplicatorError, Result};
