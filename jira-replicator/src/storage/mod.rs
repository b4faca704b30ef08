//! Object storage destinations.

pub mod s3;

pub use s3::S3Sink;

use crate::config::Config;
use crate::sink::UploadOptions;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Content type of Jira backup archives
pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Render an object key, replacing `{date}` with the UTC date of `at`.
pub fn destination_key(template: &str, at: DateTime<Utc>) -> String {
    template.replace("{date}", &at.format("%Y-%m-%d").to_string())
}

/// Upload options derived from the `[s3]` and `[kms]` sections.
pub fn upload_options(config: &Config) -> UploadOptions {
    let mut metadata = HashMap::new();
    metadata.insert("source-url".to_string(), config.jira.url.clone());
    if let Some(host) = hostname::get().ok().and_then(|h| h.into_string().ok()) {
        metadata.insert("replicated-by".to_string(), host);
    }

    UploadOptions {
        content_type: ARCHIVE_CONTENT_TYPE.to_string(),
        storage_class: config.s3.storage_class.clone().filter(|s| !s.is_empty()),
        encryption_key_id: config.kms.key.clone().filter(|k| !k.is_empty()),
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_destination_key() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 23, 59, 0).unwrap();
        assert_eq!(destination_key("jira-{date}.zip", at), "jira-2024-03-07.zip");
        assert_eq!(destination_key("backups/jira.zip", at), "backups/jira.zip");
    }

    #[test]
    fn test_upload_options() {
        let mut config = Config::default();
        config.jira.url = "https://example.atlassian.net".into();
        config.s3.storage_class = Some("GLACIER_IR".into());
        config.kms.key = Some(String::new());

        let options = upload_options(&config);
        assert_eq!(options.content_type, "application/zip");
        assert_eq!(options.storage_class.as_deref(), Some("GLACIER_IR"));
        assert!(options.encryption_key_id.is_none());
        assert_eq!(
            options.metadata.get("source-url").map(String::as_str),
            Some("https://example.atlassian.net")
        );
    }
}
