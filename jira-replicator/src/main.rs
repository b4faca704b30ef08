//! Jira Replicator - Main entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use jira_replicator::{commands, config::Config, transfer::format_bytes, utils};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "jira-replicator", author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new backup
    #[command(visible_alias = "b")]
    Backup,

    /// Download the latest backup file
    #[command(visible_alias = "d")]
    Download {
        /// Output file location
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Upload the latest backup to S3
    S3,

    /// Replication daemon, creates backups and copies them to S3 on a fixed cadence
    Daemon,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting jira-replicator v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Backup => commands::make_backup(&config).await?,
        Command::Download { output } => {
            let written = commands::download_backup(&config, &output).await?;
            tracing::info!("Saved {} to {}", format_bytes(written), output.display());
        }
        Command::S3 => {
            let outcome = commands::copy_to_s3(&config).await?;
            tracing::info!(
                "Completed upload of {} ({} parts): {}",
                outcome.key,
                outcome.parts,
                outcome.confirmation
            );
        }
        Command::Daemon => commands::replicate(&config).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_download() {
        let args = Args::try_parse_from(["jira-replicator", "d", "-o", "/tmp/jira.zip"]).unwrap();
        match args.command {
            Command::Download { output } => assert_eq!(output, PathBuf::from("/tmp/jira.zip")),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "jira-replicator",
            "daemon",
            "--config",
            "replicator.toml",
            "-l",
            "debug",
        ])
        .unwrap();
        assert!(matches!(args.command, Command::Daemon));
        assert_eq!(args.config, Some(PathBuf::from("replicator.toml")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_download_requires_output() {
        assert!(Args::try_parse_from(["jira-replicator", "download"]).is_err());
    }
}
