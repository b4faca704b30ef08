//! Replication cycle: trigger, back off on rate limits, poll until the export
//! is ready, stream it into object storage, then wait for the next cycle.
//!
//! Everything runs sequentially on the caller's task. Every sleep is raced
//! against the shutdown token, so a stop request takes effect between steps.

mod phase;

pub use phase::CyclePhase;

use crate::config::Config;
use crate::reporter::{Reporter, ReplicatorEvent, TracingReporter};
use crate::sink::{ChunkedSink, UploadOptions};
use crate::source::{ready_locator, BackupJob, BackupSource, BackupState};
use crate::storage::destination_key;
use crate::transfer::{format_bytes, format_duration, ChunkedTransfer, TransferOutcome, PART_SIZE};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::{ReplicatorError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Timing and destination settings for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    pub cycle_interval: Duration,
    pub status_timeout: Duration,
    pub io_timeout: Duration,
    pub part_size: usize,
    pub key_template: String,
    pub upload: UploadOptions,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config, upload: UploadOptions) -> Self {
        Self {
            poll_interval: config.schedule.poll_interval(),
            cycle_interval: config.schedule.cycle_interval(),
            status_timeout: config.http.timeout(),
            io_timeout: config.http.io_timeout(),
            part_size: config.schedule.part_size(),
            key_template: config.s3.key_template.clone(),
            upload,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            cycle_interval: Duration::from_secs(48 * 3600),
            status_timeout: Duration::from_secs(60),
            io_timeout: Duration::from_secs(300),
            part_size: PART_SIZE,
            key_template: "jira-{date}.zip".to_string(),
            upload: UploadOptions::default(),
        }
    }
}

/// Summary of a completed cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub polls: u32,
    pub transfer: TransferOutcome,
    pub duration: Duration,
}

pub struct BackupOrchestrator<S, K> {
    settings: OrchestratorSettings,
    source: Arc<S>,
    sink: Arc<K>,
    reporter: Arc<dyn Reporter>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    phase: CyclePhase,
}

impl<S, K> BackupOrchestrator<S, K>
where
    S: BackupSource,
    K: ChunkedSink,
{
    pub fn new(
        settings: OrchestratorSettings,
        source: Arc<S>,
        sink: Arc<K>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            settings,
            source,
            sink,
            reporter: Arc::new(TracingReporter),
            clock: Arc::new(SystemClock),
            shutdown,
            phase: CyclePhase::Idle,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Run cycles until a fatal error or shutdown.
    ///
    /// Returns `Ok(())` only when shutdown was requested; trigger, job and
    /// transfer failures end the run with the error.
    pub async fn run_forever(&mut self) -> Result<()> {
        info!(
            poll_interval = %format_duration(self.settings.poll_interval.as_secs()),
            cycle_interval = %format_duration(self.settings.cycle_interval.as_secs()),
            "Replication daemon started"
        );

        loop {
            match self.run_cycle().await {
                Ok(report) => {
                    info!(
                        cycle_id = %report.cycle_id,
                        key = %report.transfer.key,
                        "Backup and copy to S3 completed. Took {}",
                        format_duration(report.duration.as_secs())
                    );
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => {
                    info!("Replication stopped");
                    return Ok(());
                }
            }

            let interval = self.settings.cycle_interval;
            let next_trigger_at = chrono::Duration::from_std(interval)
                .ok()
                .and_then(|d| self.clock.now().checked_add_signed(d))
                .map(|at| at.to_rfc3339())
                .unwrap_or_default();
            info!(
                "Starting a new backup in {} at: {}",
                format_duration(interval.as_secs()),
                next_trigger_at
            );
            self.reporter
                .notify(&ReplicatorEvent::CycleScheduled { next_trigger_at });

            if self.sleep(interval).await.is_err() {
                info!("Replication stopped");
                return Ok(());
            }
        }
    }

    /// Run one trigger → poll → transfer cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let cycle_id = Uuid::new_v4();
        self.enter(CyclePhase::Idle);

        match self.cycle(cycle_id).await {
            Ok(report) => Ok(report),
            Err(e) if !e.is_fatal() => Err(e),
            Err(e) => {
                if !self.phase.is_terminal() {
                    self.enter(CyclePhase::Failed);
                }
                error!(cycle_id = %cycle_id, error = %e, "Replication cycle failed");
                self.reporter.notify(&ReplicatorEvent::CycleFailed {
                    cycle_id: cycle_id.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Copy the most recent backup without triggering a new one.
    pub async fn copy_latest(&mut self) -> Result<TransferOutcome> {
        let cycle_id = Uuid::new_v4();
        let locator = ready_locator(self.source.as_ref()).await?;
        self.transfer_job(cycle_id, &locator).await
    }

    async fn cycle(&mut self, cycle_id: Uuid) -> Result<CycleReport> {
        let started = Instant::now();

        let triggered_at = self.trigger_with_backoff(cycle_id).await?;
        let mut job = BackupJob::new(cycle_id, triggered_at);

        let polls = self.poll_until_finished(&mut job).await?;
        let locator = match (&job.state, job.download_locator.take()) {
            (BackupState::Ready, Some(locator)) => locator,
            (BackupState::Ready, None) => {
                return Err(ReplicatorError::JobFailed(
                    "Ready without a download locator".to_string(),
                ))
            }
            (state, _) => return Err(ReplicatorError::JobFailed(state.as_str().to_string())),
        };

        let transfer = self.transfer_job(cycle_id, &locator).await?;
        self.enter(CyclePhase::Completed);

        let duration = started.elapsed();
        self.reporter.notify(&ReplicatorEvent::CycleCompleted {
            cycle_id: cycle_id.to_string(),
            duration_secs: duration.as_secs(),
        });

        Ok(CycleReport {
            cycle_id,
            polls,
            transfer,
            duration,
        })
    }

    /// Trigger a backup, waiting out rate limits for as long as it takes.
    async fn trigger_with_backoff(&mut self, cycle_id: Uuid) -> Result<DateTime<Utc>> {
        loop {
            self.enter(CyclePhase::Triggering);
            if self.shutdown.is_cancelled() {
                return Err(ReplicatorError::Shutdown);
            }

            match self.source.trigger().await {
                Ok(()) => {
                    self.reporter.notify(&ReplicatorEvent::BackupTriggered {
                        cycle_id: cycle_id.to_string(),
                    });
                    return Ok(self.clock.now());
                }
                Err(ReplicatorError::RateLimited(condition)) => {
                    let wait = condition.retry_in(self.clock.now());
                    self.enter(CyclePhase::RateLimited);
                    warn!(
                        retry_at = %condition.retry_at().to_rfc3339(),
                        "Backup rate exceeded. Retrying in {}",
                        format_duration(wait.as_secs())
                    );
                    self.reporter.notify(&ReplicatorEvent::RateLimited {
                        cycle_id: cycle_id.to_string(),
                        retry_at: condition.retry_at().to_rfc3339(),
                        retry_in_secs: wait.as_secs(),
                    });
                    self.sleep(wait).await?;
                }
                Err(ReplicatorError::Shutdown) => return Err(ReplicatorError::Shutdown),
                Err(e @ ReplicatorError::Trigger(_)) => return Err(e),
                Err(e) => return Err(ReplicatorError::Trigger(e.to_string())),
            }
        }
    }

    /// Poll until the job leaves its in-progress states. Returns the poll count.
    async fn poll_until_finished(&mut self, job: &mut BackupJob) -> Result<u32> {
        self.enter(CyclePhase::Polling);
        info!(cycle_id = %job.id, "Waiting for backup to be ready");

        let mut polls = 0u32;
        loop {
            self.sleep(self.settings.poll_interval).await?;
            polls += 1;

            debug!(cycle_id = %job.id, poll = polls, "Checking backup status");
            let result = match timeout(self.settings.status_timeout, self.source.status()).await {
                Ok(result) => result,
                Err(_) => Err(ReplicatorError::Timeout(format!(
                    "querying backup status after {}s",
                    self.settings.status_timeout.as_secs()
                ))),
            };

            match result {
                Ok(status) => {
                    job.apply(&status);
                    self.reporter.notify(&ReplicatorEvent::BackupStatus {
                        cycle_id: job.id.to_string(),
                        status: status.state.as_str().to_string(),
                        progress: status.progress,
                    });
                    if status.state.is_terminal() {
                        return Ok(polls);
                    }
                }
                Err(e) => {
                    warn!(cycle_id = %job.id, error = %e, "Unable to get backup status");
                    self.reporter.notify(&ReplicatorEvent::StatusError {
                        cycle_id: job.id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    async fn transfer_job(&mut self, cycle_id: Uuid, locator: &str) -> Result<TransferOutcome> {
        self.enter(CyclePhase::Transferring);
        let key = destination_key(&self.settings.key_template, self.clock.now());
        info!(cycle_id = %cycle_id, key = %key, "Copying backup to S3");

        match self.stream_into_sink(cycle_id, &key, locator).await {
            Ok(outcome) => {
                self.reporter.notify(&ReplicatorEvent::TransferCompleted {
                    cycle_id: cycle_id.to_string(),
                    key: outcome.key.clone(),
                    parts: outcome.parts,
                    bytes: outcome.bytes,
                    confirmation: outcome.confirmation.clone(),
                });
                Ok(outcome)
            }
            Err(e) => {
                self.enter(CyclePhase::TransferFailed);
                error!(cycle_id = %cycle_id, key = %key, error = %e, "Unable to copy backup to S3");
                self.reporter.notify(&ReplicatorEvent::TransferFailed {
                    cycle_id: cycle_id.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn stream_into_sink(&self, cycle_id: Uuid, key: &str, locator: &str) -> Result<TransferOutcome> {
        let (mut reader, total) = match timeout(self.settings.io_timeout, self.source.open_stream(locator)).await {
            Ok(Ok(opened)) => opened,
            Ok(Err(e @ ReplicatorError::Transfer(_))) => return Err(e),
            Ok(Err(e)) => return Err(ReplicatorError::Transfer(format!("Unable to get backup: {}", e))),
            Err(_) => {
                return Err(ReplicatorError::Transfer(format!(
                    "Timed out opening backup download after {}s",
                    self.settings.io_timeout.as_secs()
                )))
            }
        };

        info!(cycle_id = %cycle_id, size = %format_bytes(total), "Backup download opened");
        let id = cycle_id.to_string();
        self.reporter.notify(&ReplicatorEvent::TransferStarted {
            cycle_id: id.clone(),
            key: key.to_string(),
            total_bytes: total,
        });

        let reporter = Arc::clone(&self.reporter);
        ChunkedTransfer::new(self.settings.part_size, self.settings.io_timeout)
            .run(
                self.sink.as_ref(),
                &mut reader,
                total,
                key,
                &self.settings.upload,
                |record, bytes, progress| {
                    reporter.notify(&ReplicatorEvent::PartUploaded {
                        cycle_id: id.clone(),
                        index: record.index,
                        bytes: bytes as u64,
                        transferred_bytes: progress.transferred_bytes,
                        total_bytes: progress.total_bytes,
                        percent: progress.percent_complete,
                    });
                },
            )
            .await
    }

    /// Sleep unless shutdown is requested first.
    async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ReplicatorError::Shutdown),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn enter(&mut self, phase: CyclePhase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "Cycle phase");
            self.phase = phase;
        }
    }
}
