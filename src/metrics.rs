//! Metrics collection for the uploader
//!
//! Thread-safe counters updated by the coordinator and every worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector for multipart uploads
///
/// All operations are thread-safe using atomic operations.
#[derive(Debug, Default)]
pub struct UploadMetrics {
    // Upload statistics
    uploads_started: AtomicU64,
    uploads_completed: AtomicU64,
    uploads_aborted: AtomicU64,
    uploads_failed: AtomicU64,

    // Part statistics
    part_attempts: AtomicU64,
    part_retries: AtomicU64,
    parts_completed: AtomicU64,
    parts_failed: AtomicU64,
    bytes_uploaded: AtomicU64,

    // Session cleanup statistics
    abort_calls: AtomicU64,
    abort_failures: AtomicU64,
    finalize_failures: AtomicU64,

    // Latency (microseconds)
    total_upload_duration_us: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub uploads_started: u64,
    pub uploads_completed: u64,
    pub uploads_aborted: u64,
    pub uploads_failed: u64,

    pub part_attempts: u64,
    pub part_retries: u64,
    pub parts_completed: u64,
    pub parts_failed: u64,
    pub bytes_uploaded: u64,

    pub abort_calls: u64,
    pub abort_failures: u64,
    pub finalize_failures: u64,

    pub total_upload_duration_us: u64,
}

impl UploadMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_upload_started(&self) {
        self.uploads_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finalized upload and its wall-clock duration
    pub fn record_upload_completed(&self, duration: Duration) {
        self.uploads_completed.fetch_add(1, Ordering::Relaxed);
        self.total_upload_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_upload_aborted(&self) {
        self.uploads_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an upload that ended without finalize or abort
    pub fn record_upload_failed(&self) {
        self.uploads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_part_attempt(&self) {
        self.part_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_part_retry(&self) {
        self.part_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a part acknowledged by the storage service
    ///
    /// # Arguments
    /// * `bytes` - Size of the part payload
    pub fn record_part_completed(&self, bytes: u64) {
        self.parts_completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_part_failed(&self) {
        self.parts_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an abort call
    ///
    /// # Arguments
    /// * `success` - Whether the storage service accepted the abort
    pub fn record_abort(&self, success: bool) {
        self.abort_calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.abort_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_finalize_failure(&self) {
        self.finalize_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uploads_started: self.uploads_started.load(Ordering::Relaxed),
            uploads_completed: self.uploads_completed.load(Ordering::Relaxed),
            uploads_aborted: self.uploads_aborted.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
            part_attempts: self.part_attempts.load(Ordering::Relaxed),
            part_retries: self.part_retries.load(Ordering::Relaxed),
            parts_completed: self.parts_completed.load(Ordering::Relaxed),
            parts_failed: self.parts_failed.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            abort_calls: self.abort_calls.load(Ordering::Relaxed),
            abort_failures: self.abort_failures.load(Ordering::Relaxed),
            finalize_failures: self.finalize_failures.load(Ordering::Relaxed),
            total_upload_duration_us: self.total_upload_duration_us.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    pub fn reset(&self) {
        self.uploads_started.store(0, Ordering::Relaxed);
        self.uploads_completed.store(0, Ordering::Relaxed);
        self.uploads_aborted.store(0, Ordering::Relaxed);
        self.uploads_failed.store(0, Ordering::Relaxed);
        self.part_attempts.store(0, Ordering::Relaxed);
        self.part_retries.store(0, Ordering::Relaxed);
        self.parts_completed.store(0, Ordering::Relaxed);
        self.parts_failed.store(0, Ordering::Relaxed);
        self.bytes_uploaded.store(0, Ordering::Relaxed);
        self.abort_calls.store(0, Ordering::Relaxed);
        self.abort_failures.store(0, Ordering::Relaxed);
        self.finalize_failures.store(0, Ordering::Relaxed);
        self.total_upload_duration_us.store(0, Ordering::Relaxed);
    }
}

impl MetricsSnapshot {
    /// Fraction of part attempts that were retries (0.0 - 1.0)
    pub fn retry_rate(&self) -> f64 {
        if self.part_attempts == 0 {
            0.0
        } else {
            self.part_retries as f64 / self.part_attempts as f64
        }
    }

    /// Average duration of completed uploads
    pub fn avg_upload_duration(&self) -> Duration {
        if self.uploads_completed == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.total_upload_duration_us / self.uploads_completed)
        }
    }
}
