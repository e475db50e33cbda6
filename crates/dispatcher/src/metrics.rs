//! Sink metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use observability::{RunningStats, StatsSummary};

/// Metrics for a single sink
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Current queue length
    queue_len: AtomicUsize,
    /// Records taken off the queue
    record_count: AtomicU64,
    /// Successful `write_rows` / `write_raw` calls
    write_count: AtomicU64,
    /// Rows committed
    row_count: AtomicU64,
    /// Writes lost after the retry failed
    failure_count: AtomicU64,
    /// Reconnect-and-retry attempts
    retry_count: AtomicU64,
    /// Records without a route
    unrouted_count: AtomicU64,
    /// Entries or metrics skipped as data errors
    skipped_count: AtomicU64,
    /// Write latency in milliseconds
    latency: Mutex<RunningStats>,
}

impl SinkMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current queue length
    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    /// Set current queue length
    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn record_count(&self) -> u64 {
        self.record_count.load(Ordering::Relaxed)
    }

    pub fn inc_record_count(&self) {
        self.record_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total write count
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Count one successful write of `rows` rows (0 for raw payloads)
    pub fn record_write(&self, rows: usize, latency_ms: f64) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.row_count.fetch_add(rows as u64, Ordering::Relaxed);
        if let Ok(mut stats) = self.latency.lock() {
            stats.push(latency_ms);
        }
    }

    pub fn row_count(&self) -> u64 {
        self.row_count.load(Ordering::Relaxed)
    }

    /// Get failure count
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Increment failure count
    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry_count(&self) -> u64 {
        self.retry_count.load(Ordering::Relaxed)
    }

    pub fn inc_retry_count(&self) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unrouted_count(&self) -> u64 {
        self.unrouted_count.load(Ordering::Relaxed)
    }

    pub fn inc_unrouted_count(&self) {
        self.unrouted_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped_count.load(Ordering::Relaxed)
    }

    pub fn add_skipped(&self, n: u64) {
        self.skipped_count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn latency(&self) -> StatsSummary {
        self.latency
            .lock()
            .map(|stats| stats.summary())
            .unwrap_or_default()
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            record_count: self.record_count(),
            write_count: self.write_count(),
            row_count: self.row_count(),
            failure_count: self.failure_count(),
            retry_count: self.retry_count(),
            unrouted_count: self.unrouted_count(),
            skipped_count: self.skipped_count(),
        }
    }
}

/// Snapshot of sink metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub record_count: u64,
    pub write_count: u64,
    pub row_count: u64,
    pub failure_count: u64,
    pub retry_count: u64,
    pub unrouted_count: u64,
    pub skipped_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_accounting() {
        let metrics = SinkMetrics::new();
        metrics.record_write(100, 2.0);
        metrics.record_write(1, 4.0);
        metrics.inc_retry_count();

        let snap = metrics.snapshot();
        assert_eq!(snap.write_count, 2);
        assert_eq!(snap.row_count, 101);
        assert_eq!(snap.retry_count, 1);
        assert_eq!(metrics.latency().count, 2);
        assert!((metrics.latency().mean - 3.0).abs() < 1e-10);
    }
}
