//! Byte-level progress tracking for archive transfers.

use std::time::Instant;

/// Progress of one archive transfer
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Total bytes expected, as advertised by the source (0 if unknown)
    pub total_bytes: u64,

    /// Bytes transferred so far
    pub transferred_bytes: u64,

    /// Parts uploaded so far
    pub parts_uploaded: usize,

    /// Current transfer speed in bytes/second
    pub bytes_per_second: u64,

    /// Estimated time remaining (seconds)
    pub eta_seconds: u64,

    /// Percentage complete (0-100)
    pub percent_complete: f64,
}

impl TransferProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            parts_uploaded: 0,
            bytes_per_second: 0,
            eta_seconds: 0,
            percent_complete: 0.0,
        }
    }

    /// Update progress with new transferred bytes
    pub fn update(&mut self, transferred_bytes: u64) {
        self.transferred_bytes = transferred_bytes;
        self.percent_complete = if self.total_bytes > 0 {
            (self.transferred_bytes as f64 / self.total_bytes as f64 * 100.0).min(100.0)
        } else {
            0.0
        };
    }

    /// Account for one uploaded part of `bytes` length
    pub fn record_part(&mut self, bytes: u64) {
        self.parts_uploaded += 1;
        self.update(self.transferred_bytes + bytes);
    }

    /// Check if transfer is complete
    pub fn is_complete(&self) -> bool {
        self.transferred_bytes >= self.total_bytes
    }
}

/// Progress tracker with time-based speed calculation
pub struct ProgressTracker {
    start_time: Instant,
    last_update_time: Instant,
    last_bytes: u64,
    progress: TransferProgress,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64) -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_update_time: now,
            last_bytes: 0,
            progress: TransferProgress::new(total_bytes),
        }
    }

    /// Record an uploaded part and recalculate speed
    pub fn record_part(&mut self, bytes: u64) -> &TransferProgress {
        self.progress.record_part(bytes);
        self.refresh_rates();
        &self.progress
    }

    fn refresh_rates(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update_time).as_secs_f64();
        let transferred = self.progress.transferred_bytes;

        if elapsed > 0.0 {
            let bytes_diff = transferred.saturating_sub(self.last_bytes);
            self.progress.bytes_per_second = (bytes_diff as f64 / elapsed) as u64;
        }

        if self.progress.bytes_per_second > 0 {
            let remaining_bytes = self.progress.total_bytes.saturating_sub(transferred);
            self.progress.eta_seconds = remaining_bytes / self.progress.bytes_per_second;
        }

        self.last_update_time = now;
        self.last_bytes = transferred;
    }

    /// Get average speed since start
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.progress.transferred_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }

    pub fn progress(&self) -> &TransferProgress {
        &self.progress
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_transfer_progress_update() {
        let mut progress = TransferProgress::new(1000);
        progress.update(500);
        assert_eq!(progress.transferred_bytes, 500);
        assert!((progress.percent_complete - 50.0).abs() < 0.01);
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_record_part() {
        let mut progress = TransferProgress::new(1000);
        progress.record_part(600);
        progress.record_part(400);
        assert_eq!(progress.parts_uploaded, 2);
        assert_eq!(progress.transferred_bytes, 1000);
        assert!(progress.is_complete());
        assert!((progress.percent_complete - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_unknown_total_reports_zero_percent() {
        let mut progress = TransferProgress::new(0);
        progress.record_part(10);
        assert_eq!(progress.percent_complete, 0.0);
    }

    #[test]
    fn test_progress_tracker_speed() {
        let mut tracker = ProgressTracker::new(1000);
        tracker.record_part(100);

        thread::sleep(Duration::from_millis(100));
        let prog = tracker.record_part(400);
        assert_eq!(prog.transferred_bytes, 500);
        assert_eq!(prog.parts_uploaded, 2);
        assert!(prog.bytes_per_second > 0);
        assert!(tracker.average_speed() > 0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(64 * 1024 * 1024), "64.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_speed_and_duration() {
        assert_eq!(format_speed(1024 * 1024), "1.00 MB/s");
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3665), "1h 1m");
    }
}
