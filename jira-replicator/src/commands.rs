//! Command handlers behind the CLI.

use crate::config::Config;
use crate::daemon::shutdown::ShutdownCoordinator;
use crate::jira::JiraClient;
use crate::orchestrator::{BackupOrchestrator, OrchestratorSettings};
use crate::source::{ready_locator, BackupSource};
use crate::storage::{upload_options, S3Sink};
use crate::transfer::{format_bytes, TransferOutcome};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::{ReplicatorError, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Trigger a single backup.
pub async fn make_backup(config: &Config) -> Result<()> {
    config.validate()?;
    let client = JiraClient::new(&config.jira, &config.http)?;

    match client.trigger().await {
        Ok(()) => {
            info!("Backup started");
            Ok(())
        }
        Err(ReplicatorError::RateLimited(condition)) => {
            warn!(
                "Backup rate exceeded. Try again at: {}",
                condition.retry_at().to_rfc3339()
            );
            Err(ReplicatorError::RateLimited(condition))
        }
        Err(e) => {
            error!("Unable to create backup: {}", e);
            Err(e)
        }
    }
}

/// Download the latest ready backup to `output`. Returns bytes written.
pub async fn download_backup(config: &Config, output: &Path) -> Result<u64> {
    config.validate()?;
    let client = JiraClient::new(&config.jira, &config.http)?;

    let locator = ready_locator(&client).await?;
    let (mut reader, total) = client.open_stream(&locator).await?;

    let mut file = tokio::fs::File::create(output).await?;
    let written = tokio::io::copy(&mut reader, &mut file).await?;
    file.flush().await?;

    if total > 0 && written != total {
        warn!(expected = total, written, "Download size differs from Content-Length");
    }
    info!(path = %output.display(), size = %format_bytes(written), "Backup downloaded");
    Ok(written)
}

/// Copy the latest ready backup to S3.
pub async fn copy_to_s3(config: &Config) -> Result<TransferOutcome> {
    let mut orchestrator = build_orchestrator(config, CancellationToken::new()).await?;
    orchestrator.copy_latest().await
}

/// Run the replication daemon until a fatal error or a shutdown signal.
pub async fn replicate(config: &Config) -> Result<()> {
    let coordinator = ShutdownCoordinator::new();
    let mut orchestrator = build_orchestrator(config, coordinator.token()).await?;

    let signals = tokio::spawn(async move {
        coordinator.wait_for_signal().await;
    });

    let result = orchestrator.run_forever().await;
    signals.abort();
    result
}

async fn build_orchestrator(
    config: &Config,
    shutdown: CancellationToken,
) -> Result<BackupOrchestrator<JiraClient, S3Sink>> {
    config.validate_upload()?;

    // Rate-limit deadlines and backoff waits must read the same clock
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source = Arc::new(JiraClient::new(&config.jira, &config.http)?.with_clock(Arc::clone(&clock)));
    let sink = Arc::new(S3Sink::from_config(&config.s3).await?);
    let settings = OrchestratorSettings::from_config(config, upload_options(config));

    Ok(BackupOrchestrator::new(settings, source, sink, shutdown).with_clock(clock))
}
