//! Fixed-size part upload of a byte stream.
//!
//! Parts are read and uploaded strictly in sequence. A read or upload failure
//! abandons the session without completing it; cleaning up abandoned uploads is
//! left to the storage side (e.g. a bucket lifecycle rule).

use crate::sink::{ChunkedSink, PartRecord, UploadOptions, UploadSession};
use crate::transfer::progress::{format_bytes, format_speed, ProgressTracker, TransferProgress};
use crate::utils::{ReplicatorError, Result};
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::{debug, info};

/// Default part size: 64 MiB.
pub const PART_SIZE: usize = 64 * 1024 * 1024;

/// Result of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub key: String,
    pub parts: usize,
    pub bytes: u64,
    pub confirmation: String,
}

/// Copies a stream into a multipart upload in fixed-size parts.
#[derive(Debug, Clone)]
pub struct ChunkedTransfer {
    part_size: usize,
    io_timeout: Duration,
}

impl ChunkedTransfer {
    pub fn new(part_size: usize, io_timeout: Duration) -> Self {
        Self {
            part_size: part_size.max(1),
            io_timeout,
        }
    }

    pub fn part_size(&self) -> usize {
        self.part_size
    }

    /// Stream `reader` into `key` on `sink`.
    ///
    /// `on_part` is called after each part is uploaded, with the part's length. An empty stream still
    /// opens and completes the upload, with zero parts.
    pub async fn run<K, R, F>(
        &self,
        sink: &K,
        reader: &mut R,
        total_length: u64,
        key: &str,
        options: &UploadOptions,
        mut on_part: F,
    ) -> Result<TransferOutcome>
    where
        K: ChunkedSink + ?Sized,
        R: AsyncRead + Unpin + ?Sized,
        F: FnMut(&PartRecord, usize, &TransferProgress),
    {
        let session = sink.begin_upload(key, options).await.map_err(|e| {
            ReplicatorError::Transfer(format!("Unable to create multi-part upload: {}", e))
        })?;

        let expected_parts = expected_parts(total_length, self.part_size);
        info!(
            key = %key,
            upload_id = %session.upload_id,
            total = %format_bytes(total_length),
            expected_parts,
            "Multi-part upload started"
        );

        let mut tracker = ProgressTracker::new(total_length);
        let mut parts: Vec<PartRecord> = Vec::new();
        let mut index: i32 = 1;

        loop {
            let mut window = vec![0u8; self.part_size];
            let filled = self.fill_window(reader, &mut window, index).await?;
            if filled == 0 {
                break;
            }
            window.truncate(filled);

            let token = self.upload_part(sink, &session, index, Bytes::from(window)).await?;
            let record = PartRecord { index, token };

            let progress = tracker.record_part(filled as u64);
            debug!(
                part = index,
                bytes = filled,
                transferred = progress.transferred_bytes,
                speed = %format_speed(progress.bytes_per_second),
                "Uploaded part"
            );
            on_part(&record, filled, progress);
            parts.push(record);

            // A short window means the reader already hit end of stream
            if filled < self.part_size {
                break;
            }
            index = index
                .checked_add(1)
                .ok_or_else(|| ReplicatorError::Transfer("Part index overflow".to_string()))?;
        }

        let part_count = parts.len();
        let bytes = tracker.progress().transferred_bytes;

        info!(key = %key, parts = part_count, bytes, "Completing upload");
        let confirmation = match timeout(self.io_timeout, sink.complete_upload(session, parts)).await {
            Ok(Ok(confirmation)) => confirmation,
            Ok(Err(e)) => {
                return Err(ReplicatorError::Transfer(format!(
                    "Unable to complete upload: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(ReplicatorError::Transfer(format!(
                    "Timed out completing upload after {}s",
                    self.io_timeout.as_secs()
                )))
            }
        };

        info!(
            key = %key,
            parts = part_count,
            size = %format_bytes(bytes),
            average_speed = %format_speed(tracker.average_speed()),
            confirmation = %confirmation,
            "Completed upload"
        );

        Ok(TransferOutcome {
            key: key.to_string(),
            parts: part_count,
            bytes,
            confirmation,
        })
    }

    /// Read until `window` is full or the stream ends.
    async fn fill_window<R>(&self, reader: &mut R, window: &mut [u8], index: i32) -> Result<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut filled = 0;
        while filled < window.len() {
            let read = match timeout(self.io_timeout, reader.read(&mut window[filled..])).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    return Err(ReplicatorError::Transfer(format!(
                        "Unable to read part {}: {}",
                        index, e
                    )))
                }
                Err(_) => {
                    return Err(ReplicatorError::Transfer(format!(
                        "Timed out reading part {} after {}s",
                        index,
                        self.io_timeout.as_secs()
                    )))
                }
            };
            if read == 0 {
                break;
            }
            filled += read;
        }
        Ok(filled)
    }

    async fn upload_part<K>(&self, sink: &K, session: &UploadSession, index: i32, body: Bytes) -> Result<String>
    where
        K: ChunkedSink + ?Sized,
    {
        match timeout(self.io_timeout, sink.upload_part(session, index, body)).await {
            Ok(Ok(token)) => Ok(token),
            Ok(Err(e)) => Err(ReplicatorError::Transfer(format!(
                "Unable to upload part {}: {}",
                index, e
            ))),
            Err(_) => Err(ReplicatorError::Transfer(format!(
                "Timed out uploading part {} after {}s",
                index,
                self.io_timeout.as_secs()
            ))),
        }
    }
}

/// Number of parts a payload of `total_length` bytes splits into.
pub fn expected_parts(total_length: u64, part_size: usize) -> u64 {
    total_length.div_ceil(part_size.max(1) as u64)
}
