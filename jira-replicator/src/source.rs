//! The backup source contract and the job/status types the orchestrator tracks.

use crate::utils::{ReplicatorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use uuid::Uuid;

/// Byte stream of a ready backup archive.
pub type ArchiveReader = Box<dyn AsyncRead + Send + Unpin>;

/// Lifecycle of a backup job as reported by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupState {
    Requested,
    InProgress,
    Ready,
    /// Any terminal status other than ready, with the raw status text.
    Failed(String),
}

impl BackupState {
    /// Map the upstream status string onto a state.
    pub fn parse(status: &str) -> Self {
        match status {
            "InProgress" => BackupState::InProgress,
            "Success" | "Ready" => BackupState::Ready,
            "Requested" | "Pending" => BackupState::Requested,
            other => BackupState::Failed(other.to_string()),
        }
    }

    /// Requested and InProgress keep the poll loop going.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BackupState::Requested | BackupState::InProgress)
    }

    pub fn as_str(&self) -> &str {
        match self {
            BackupState::Requested => "Requested",
            BackupState::InProgress => "InProgress",
            BackupState::Ready => "Ready",
            BackupState::Failed(status) => status,
        }
    }
}

/// One status poll result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupStatus {
    pub state: BackupState,
    pub progress: i64,
    pub download_locator: Option<String>,
}

/// A triggered backup, owned by a single orchestration cycle.
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub id: Uuid,
    pub triggered_at: DateTime<Utc>,
    pub state: BackupState,
    pub download_locator: Option<String>,
}

impl BackupJob {
    pub fn new(id: Uuid, triggered_at: DateTime<Utc>) -> Self {
        Self {
            id,
            triggered_at,
            state: BackupState::Requested,
            download_locator: None,
        }
    }

    /// Apply a poll result. The locator is only kept once the job is ready.
    pub fn apply(&mut self, status: &BackupStatus) {
        self.state = status.state.clone();
        self.download_locator = match self.state {
            BackupState::Ready => status.download_locator.clone(),
            _ => None,
        };
    }
}

/// Remote system that produces backups.
#[async_trait]
pub trait BackupSource: Send + Sync {
    /// Request a new backup. A rejection due to rate limiting is returned as
    /// `ReplicatorError::RateLimited`.
    async fn trigger(&self) -> Result<()>;

    /// Query the state of the most recent backup.
    async fn status(&self) -> Result<BackupStatus>;

    /// Open the archive behind a download locator, with its total length.
    async fn open_stream(&self, locator: &str) -> Result<(ArchiveReader, u64)>;
}

/// Locator of the most recent backup, provided it is ready to download.
pub async fn ready_locator<S: BackupSource + ?Sized>(source: &S) -> Result<String> {
    let status = source.status().await?;
    match (status.state, status.download_locator) {
        (BackupState::Ready, Some(locator)) => Ok(locator),
        (BackupState::Ready, None) => Err(ReplicatorError::JobFailed(
            "Ready without a download locator".to_string(),
        )),
        (state, _) => Err(ReplicatorError::JobFailed(state.as_str().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_states() {
        assert_eq!(BackupState::parse("InProgress"), BackupState::InProgress);
        assert_eq!(BackupState::parse("Success"), BackupState::Ready);
        assert_eq!(BackupState::parse("Ready"), BackupState::Ready);
        assert_eq!(BackupState::parse("Requested"), BackupState::Requested);
        assert_eq!(
            BackupState::parse("Failed"),
            BackupState::Failed("Failed".to_string())
        );
        assert_eq!(BackupState::parse(""), BackupState::Failed(String::new()));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!BackupState::InProgress.is_terminal());
        assert!(!BackupState::Requested.is_terminal());
        assert!(BackupState::Ready.is_terminal());
        assert!(BackupState::Failed("Cancelled".into()).is_terminal());
    }

    #[test]
    fn test_job_keeps_locator_only_when_ready() {
        let mut job = BackupJob::new(Uuid::new_v4(), Utc::now());
        assert_eq!(job.state, BackupState::Requested);

        job.apply(&BackupStatus {
            state: BackupState::InProgress,
            progress: 40,
            download_locator: Some("stale".into()),
        });
        assert!(job.download_locator.is_none());

        job.apply(&BackupStatus {
            state: BackupState::Ready,
            progress: 100,
            download_locator: Some("export/download/?fileId=1".into()),
        });
        assert_eq!(job.state, BackupState::Ready);
        assert_eq!(job.download_locator.as_deref(), Some("export/download/?fileId=1"));
    }
}
