//! Jira Cloud backup REST client.

pub mod client;

pub use client::JiraClient;

use serde::Deserialize;

/// Body of `GET /rest/backup/1/export/getProgress`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressResponse {
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub progress: i64,

    /// Relative download path, present once the export succeeded
    #[serde(default)]
    pub result: Option<String>,
}

/// Body of a rejected trigger (HTTP 412).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RejectionResponse {
    #[serde(default)]
    pub error: String,
}
