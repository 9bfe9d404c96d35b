//! Provider metrics collection.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Snapshot of provider metrics at a point in time.
pub struct MetricsSnapshot {
    /// Sends handed to the transport (blocking and non-blocking).
    pub sends_issued: u64,
    /// Sends that went through the blocking path.
    pub blocking_sends: u64,
    /// Receives posted to the transport.
    pub recvs_posted: u64,
    /// Bytes accepted by the transport for sending.
    pub bytes_sent: u64,
    /// Bytes delivered into receive buffers.
    pub bytes_received: u64,
    /// Completion events pushed to completion queues.
    pub completions_delivered: u64,
    /// Completions kept out of completion queues.
    pub completions_suppressed: u64,
    /// Completions for endpoints that no longer exist.
    pub completions_dropped: u64,
    /// Operations that completed with an error status.
    pub completion_errors: u64,
    /// Operations refused at issue time.
    pub issue_errors: u64,
    /// Operations refused because the request pool was empty.
    pub pool_exhausted: u64,
}

/// Thread-safe provider metrics collector, shared by a domain and its endpoints.
#[derive(Default)]
pub struct ProviderMetrics {
    sends_issued: AtomicU64,
    blocking_sends: AtomicU64,
    recvs_posted: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    completions_delivered: AtomicU64,
    completions_suppressed: AtomicU64,
    completions_dropped: AtomicU64,
    completion_errors: AtomicU64,
    issue_errors: AtomicU64,
    pool_exhausted: AtomicU64,
}

impl std::fmt::Debug for ProviderMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl ProviderMetrics {
    /// Creates a collector with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a send accepted by the transport.
    pub fn record_send(&self, bytes: usize, blocking: bool) {
        self.sends_issued.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        if blocking {
            self.blocking_sends.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a receive posted to the transport.
    pub fn record_recv_posted(&self) {
        self.recvs_posted.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds to the bytes received counter.
    pub fn add_bytes_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Increments the delivered completions counter.
    pub fn inc_completions_delivered(&self) {
        self.completions_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the suppressed completions counter.
    pub fn inc_completions_suppressed(&self) {
        self.completions_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the dropped completions counter.
    pub fn inc_completions_dropped(&self) {
        self.completions_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the failed completions counter.
    pub fn inc_completion_errors(&self) {
        self.completion_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the issue-time error counter.
    pub fn inc_issue_errors(&self) {
        self.issue_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the pool exhaustion counter.
    pub fn inc_pool_exhausted(&self) {
        self.pool_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sends_issued: self.sends_issued.load(Ordering::Relaxed),
            blocking_sends: self.blocking_sends.load(Ordering::Relaxed),
            recvs_posted: self.recvs_posted.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            completions_delivered: self.completions_delivered.load(Ordering::Relaxed),
            completions_suppressed: self.completions_suppressed.load(Ordering::Relaxed),
            completions_dropped: self.completions_dropped.load(Ordering::Relaxed),
            completion_errors: self.completion_errors.load(Ordering::Relaxed),
            issue_errors: self.issue_errors.load(Ordering::Relaxed),
            pool_exhausted: self.pool_exhausted.load(Ordering::Relaxed),
        }
    }
}
