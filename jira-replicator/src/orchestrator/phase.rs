//! Phases of a replication cycle.

use std::fmt;

/// Where a replication cycle currently is.
///
/// `Idle -> Triggering -> (RateLimited -> Triggering)* -> Polling -> Transferring -> Completed`,
/// with `Failed` and `TransferFailed` ending the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Triggering,
    RateLimited,
    Polling,
    Transferring,
    Completed,
    Failed,
    TransferFailed,
}

impl CyclePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CyclePhase::Failed | CyclePhase::TransferFailed)
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Triggering => "triggering",
            CyclePhase::RateLimited => "rate_limited",
            CyclePhase::Polling => "polling",
            CyclePhase::Transferring => "transferring",
            CyclePhase::Completed => "completed",
            CyclePhase::Failed => "failed",
            CyclePhase::TransferFailed => "transfer_failed",
        };
        f.write_str(name)
    }
}
