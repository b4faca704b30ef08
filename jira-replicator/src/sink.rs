//! The multipart upload contract for durable object storage.

use crate::utils::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

/// Options applied when a multipart upload is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub content_type: String,
    pub storage_class: Option<String>,
    pub encryption_key_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Handle to an open multipart upload. `complete_upload` consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct UploadSession {
    pub upload_id: String,
    pub key: String,
}

/// One uploaded part. Indices start at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRecord {
    pub index: i32,
    pub token: String,
}

#[async_trait]
pub trait ChunkedSink: Send + Sync {
    async fn begin_upload(&self, key: &str, options: &UploadOptions) -> Result<UploadSession>;

    /// Upload one part and return its remote token.
    async fn upload_part(&self, session: &UploadSession, index: i32, body: Bytes) -> Result<String>;

    /// Finish the upload with parts in ascending index order.
    async fn complete_upload(&self, session: UploadSession, parts: Vec<PartRecord>) -> Result<String>;
}
