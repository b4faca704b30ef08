//! Streaming an archive into a multipart upload.

pub mod chunked;
pub mod progress;
pub mod progress_stream;

pub use chunked::{ChunkedTransfer, TransferOutcome, PART_SIZE};
pub use progress::{format_bytes, format_duration, format_speed, ProgressTracker, TransferProgress};
