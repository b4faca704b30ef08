//! Status-change events emitted by the orchestrator.
//!
//! Reporting is best-effort: `Reporter::notify` cannot fail, and implementations
//! must not block the cycle.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

/// Events emitted over the course of a replication cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ReplicatorEvent {
    #[serde(rename = "backup:triggered")]
    BackupTriggered { cycle_id: String },

    #[serde(rename = "backup:rate_limited")]
    RateLimited {
        cycle_id: String,
        retry_at: String,
        retry_in_secs: u64,
    },

    #[serde(rename = "backup:status")]
    BackupStatus {
        cycle_id: String,
        status: String,
        progress: i64,
    },

    #[serde(rename = "backup:status_error")]
    StatusError { cycle_id: String, error: String },

    #[serde(rename = "transfer:started")]
    TransferStarted {
        cycle_id: String,
        key: String,
        total_bytes: u64,
    },

    #[serde(rename = "transfer:part")]
    PartUploaded {
        cycle_id: String,
        index: i32,
        bytes: u64,
        transferred_bytes: u64,
        total_bytes: u64,
        percent: f64,
    },

    #[serde(rename = "transfer:completed")]
    TransferCompleted {
        cycle_id: String,
        key: String,
        parts: usize,
        bytes: u64,
        confirmation: String,
    },

    #[serde(rename = "transfer:failed")]
    TransferFailed { cycle_id: String, error: String },

    #[serde(rename = "cycle:completed")]
    CycleCompleted { cycle_id: String, duration_secs: u64 },

    #[serde(rename = "cycle:failed")]
    CycleFailed { cycle_id: String, error: String },

    #[serde(rename = "cycle:scheduled")]
    CycleScheduled { next_trigger_at: String },
}

impl ReplicatorEvent {
    /// Event name, e.g. `transfer:part`.
    pub fn name(&self) -> &'static str {
        match self {
            ReplicatorEvent::BackupTriggered { .. } => "backup:triggered",
            ReplicatorEvent::RateLimited { .. } => "backup:rate_limited",
            ReplicatorEvent::BackupStatus { .. } => "backup:status",
            ReplicatorEvent::StatusError { .. } => "backup:status_error",
            ReplicatorEvent::TransferStarted { .. } => "transfer:started",
            ReplicatorEvent::PartUploaded { .. } => "transfer:part",
            ReplicatorEvent::TransferCompleted { .. } => "transfer:completed",
            ReplicatorEvent::TransferFailed { .. } => "transfer:failed",
            ReplicatorEvent::CycleCompleted { .. } => "cycle:completed",
            ReplicatorEvent::CycleFailed { .. } => "cycle:failed",
            ReplicatorEvent::CycleScheduled { .. } => "cycle:scheduled",
        }
    }

    /// Event payload as a flat JSON map.
    pub fn detail(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut obj)) => match obj.remove("payload") {
                Some(Value::Object(payload)) => payload,
                _ => Map::new(),
            },
            _ => Map::new(),
        }
    }

    fn is_failure(&self) -> bool {
        matches!(
            self,
            ReplicatorEvent::TransferFailed { .. } | ReplicatorEvent::CycleFailed { .. }
        )
    }
}

/// Receiver of orchestrator events.
pub trait Reporter: Send + Sync {
    fn notify(&self, event: &ReplicatorEvent);
}

/// Writes every event to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn notify(&self, event: &ReplicatorEvent) {
        let detail = Value::Object(event.detail());
        if event.is_failure() {
            error!(event = event.name(), %detail, "replication event");
        } else if matches!(event, ReplicatorEvent::StatusError { .. } | ReplicatorEvent::RateLimited { .. }) {
            warn!(event = event.name(), %detail, "replication event");
        } else {
            info!(event = event.name(), %detail, "replication event");
        }
    }
}
