//! Configuration management for the replicator.
//!
//! Loads configuration from a TOML file, then applies environment variable
//! overrides for the Jira connection (`JIRA_URL`, `JIRA_USERNAME`,
//! `JIRA_PASSWORD`) and `LOG_LEVEL`. A `.env` file is honoured if present.

use crate::utils::{ReplicatorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Smallest part size S3 accepts for every part but the last.
pub const MIN_PART_SIZE_MIB: usize = 5;

/// S3 rejects parts larger than 5 GiB.
pub const MAX_PART_SIZE_MIB: usize = 5 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub jira: JiraConfig,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub kms: KmsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraConfig {
    /// Base URL of the Jira instance
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub username: String,

    /// Password or API token
    #[serde(default)]
    pub password: String,

    /// Include attachments in the backup archive
    #[serde(default = "default_include_attachments")]
    pub include_attachments: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub bucket: String,

    /// Storage class for uploaded archives (e.g. STANDARD_IA)
    #[serde(default)]
    pub storage_class: Option<String>,

    /// Object key template, `{date}` is replaced with the upload date
    #[serde(default = "default_key_template")]
    pub key_template: String,

    /// Custom endpoint for S3-compatible services
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KmsConfig {
    /// KMS key id for server-side encryption
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Delay between backup status polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Delay between a completed cycle and the next trigger
    #[serde(default = "default_cycle_interval_hours")]
    pub cycle_interval_hours: u64,

    /// Multipart upload part size in MiB
    #[serde(default = "default_part_size_mib")]
    pub part_size_mib: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Deadline for trigger and status requests
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Deadline for a single stream read or part upload
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_include_attachments() -> bool {
    true
}

fn default_key_template() -> String {
    "jira-{date}.zip".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_cycle_interval_hours() -> u64 {
    48
}

fn default_part_size_mib() -> usize {
    64
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_io_timeout_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            include_attachments: default_include_attachments(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: None,
            bucket: String::new(),
            storage_class: None,
            key_template: default_key_template(),
            endpoint: None,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            cycle_interval_hours: default_cycle_interval_hours(),
            part_size_mib: default_part_size_mib(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            io_timeout_secs: default_io_timeout_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ScheduleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_hours.saturating_mul(3600))
    }

    pub fn part_size(&self) -> usize {
        self.part_size_mib.saturating_mul(1024 * 1024)
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReplicatorError::Config(format!("Unable to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| ReplicatorError::Config(format!("Invalid {}: {}", path.display(), e)))
    }

    /// Load from an optional file and apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in practice)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("JIRA_URL") {
            self.jira.url = url;
        }
        if let Some(username) = lookup("JIRA_USERNAME") {
            self.jira.username = username;
        }
        if let Some(password) = lookup("JIRA_PASSWORD") {
            self.jira.password = password;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log.level = level;
        }
    }

    /// Check the settings every command needs
    pub fn validate(&self) -> Result<()> {
        if self.jira.url.is_empty() {
            return Err(ReplicatorError::Config("Jira URL is required (JIRA_URL)".into()));
        }
        reqwest::Url::parse(&self.jira.url).map_err(|e| {
            ReplicatorError::Config(format!("Unable to parse Jira URL {}: {}", self.jira.url, e))
        })?;
        if self.http.timeout_secs == 0 || self.http.io_timeout_secs == 0 {
            return Err(ReplicatorError::Config("HTTP timeouts must be non-zero".into()));
        }
        Ok(())
    }

    /// Check the settings needed to upload to S3
    pub fn validate_upload(&self) -> Result<()> {
        self.validate()?;
        if self.s3.bucket.is_empty() {
            return Err(ReplicatorError::Config("s3.bucket is required".into()));
        }
        if self.schedule.poll_interval_secs == 0 || self.schedule.cycle_interval_hours == 0 {
            return Err(ReplicatorError::Config("Schedule intervals must be non-zero".into()));
        }
        if !(MIN_PART_SIZE_MIB..=MAX_PART_SIZE_MIB).contains(&self.schedule.part_size_mib) {
            return Err(ReplicatorError::Config(format!(
                "schedule.part_size_mib must be between {} and {}",
                MIN_PART_SIZE_MIB, MAX_PART_SIZE_MIB
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn valid() -> Config {
        let mut config = Config::default();
        config.jira.url = "https://example.atlassian.net".into();
        config.s3.bucket = "backups".into();
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.schedule.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.schedule.cycle_interval(), Duration::from_secs(48 * 3600));
        assert_eq!(config.schedule.part_size(), 64 * 1024 * 1024);
        assert_eq!(config.s3.key_template, "jira-{date}.zip");
        assert!(config.jira.include_attachments);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[jira]
url = "https://example.atlassian.net"
username = "admin"

[s3]
region = "eu-west-1"
bucket = "jira-backups"
storage_class = "STANDARD_IA"

[kms]
key = "alias/backups"

[schedule]
poll_interval_secs = 10
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.jira.username, "admin");
        assert_eq!(config.s3.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.s3.storage_class.as_deref(), Some("STANDARD_IA"));
        assert_eq!(config.kms.key.as_deref(), Some("alias/backups"));
        assert_eq!(config.schedule.poll_interval_secs, 10);
        assert_eq!(config.schedule.cycle_interval_hours, 48);
        assert_eq!(config.http.io_timeout_secs, 300);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[jira\nurl = ").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ReplicatorError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("JIRA_URL", "https://other.atlassian.net"),
            ("JIRA_PASSWORD", "token"),
        ]
        .into_iter()
        .collect();

        let mut config = valid();
        config.jira.username = "admin".into();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.jira.url, "https://other.atlassian.net");
        assert_eq!(config.jira.username, "admin");
        assert_eq!(config.jira.password, "token");
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate_upload().is_ok());

        let mut bad_url = valid();
        bad_url.jira.url = "not a url".into();
        assert!(bad_url.validate().is_err());

        let mut no_bucket = valid();
        no_bucket.s3.bucket.clear();
        assert!(no_bucket.validate().is_ok());
        assert!(no_bucket.validate_upload().is_err());

        let mut small_parts = valid();
        small_parts.schedule.part_size_mib = 1;
        assert!(small_parts.validate_upload().is_err());

        let mut no_poll = valid();
        no_poll.schedule.poll_interval_secs = 0;
        assert!(no_poll.validate_upload().is_err());
    }

    #[test]
    fn test_oversized_values_do_not_overflow() {
        let mut config = valid();
        config.schedule.cycle_interval_hours = u64::MAX;
        config.schedule.part_size_mib = usize::MAX;

        assert_eq!(config.schedule.cycle_interval(), Duration::from_secs(u64::MAX));
        assert_eq!(config.schedule.part_size(), usize::MAX);

        let err = config.validate_upload().unwrap_err();
        assert!(matches!(err, ReplicatorError::Config(_)));

        config.schedule.part_size_mib = MAX_PART_SIZE_MIB;
        assert!(config.validate_upload().is_ok());
        config.schedule.part_size_mib = MAX_PART_SIZE_MIB + 1;
        assert!(config.validate_upload().is_err());
    }
}
