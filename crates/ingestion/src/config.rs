//! Source-side counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Ingestion metrics, shared by every task of one source
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Records accepted from the source
    pub records_received: AtomicU64,

    /// Records handed to the fan-out stage (one per record, not per queue)
    pub records_published: AtomicU64,

    /// Queue deliveries dropped by an overflow policy
    pub records_dropped: AtomicU64,

    /// Frames or bodies that failed to decode
    pub parse_errors: AtomicU64,

    /// Websocket reconnect attempts
    pub reconnects: AtomicU64,

    /// Poll cycles that completed a request
    pub poll_cycles: AtomicU64,

    /// Poll cycles skipped because the request failed
    pub poll_failures: AtomicU64,
}

impl IngestionMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.records_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_cycle(&self) {
        self.poll_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_failure(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_received: self.records_received.load(Ordering::Relaxed),
            records_published: self.records_published.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            poll_cycles: self.poll_cycles.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_received: u64,
    pub records_published: u64,
    pub records_dropped: u64,
    pub parse_errors: u64,
    pub reconnects: u64,
    pub poll_cycles: u64,
    pub poll_failures: u64,
}
