//! Read metrics reported by the fetch iterator.
//!
//! The iterator updates a [`MetricsSink`] for every block it delivers and for every completed
//! block it discards during cleanup. [`ReadMetrics`] is a lock-free implementation that can be
//! shared across iterators of the same task.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Destination for fetch counters
pub trait MetricsSink: Send + Sync {
    /// Bytes received from remote servers
    fn inc_remote_bytes_read(&self, bytes: u64);
    /// Blocks received from remote servers
    fn inc_remote_blocks_fetched(&self, blocks: u64);
    /// Bytes read from local storage
    fn inc_local_bytes_read(&self, bytes: u64);
    /// Blocks read from local storage
    fn inc_local_blocks_fetched(&self, blocks: u64);
    /// Time the consumer spent blocked waiting for a result
    fn inc_fetch_wait_time(&self, wait: Duration);
}

/// Atomic counters implementing [`MetricsSink`]
#[derive(Debug, Default)]
pub struct ReadMetrics {
    remote_bytes_read: AtomicU64,
    remote_blocks_fetched: AtomicU64,
    local_bytes_read: AtomicU64,
    local_blocks_fetched: AtomicU64,
    fetch_wait_nanos: AtomicU64,
}

/// Point-in-time copy of [`ReadMetrics`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadMetricsSnapshot {
    /// Bytes received from remote servers
    pub remote_bytes_read: u64,
    /// Blocks received from remote servers
    pub remote_blocks_fetched: u64,
    /// Bytes read from local storage
    pub local_bytes_read: u64,
    /// Blocks read from local storage
    pub local_blocks_fetched: u64,
    /// Cumulative consumer wait time in nanoseconds
    pub fetch_wait_nanos: u64,
}

impl ReadMetricsSnapshot {
    /// Total blocks, remote and local
    pub fn blocks_fetched(&self) -> u64 {
        self.remote_blocks_fetched + self.local_blocks_fetched
    }

    /// Total bytes, remote and local
    pub fn bytes_read(&self) -> u64 {
        self.remote_bytes_read + self.local_bytes_read
    }
}

impl ReadMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Read all counters
    pub fn snapshot(&self) -> ReadMetricsSnapshot {
        ReadMetricsSnapshot {
            remote_bytes_read: self.remote_bytes_read.load(Ordering::Relaxed),
            remote_blocks_fetched: self.remote_blocks_fetched.load(Ordering::Relaxed),
            local_bytes_read: self.local_bytes_read.load(Ordering::Relaxed),
            local_blocks_fetched: self.local_blocks_fetched.load(Ordering::Relaxed),
            fetch_wait_nanos: self.fetch_wait_nanos.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for ReadMetrics {
    fn inc_remote_bytes_read(&self, bytes: u64) {
        self.remote_bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    fn inc_remote_blocks_fetched(&self, blocks: u64) {
        self.remote_blocks_fetched
            .fetch_add(blocks, Ordering::Relaxed);
    }

    fn inc_local_bytes_read(&self, bytes: u64) {
        self.local_bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    fn inc_local_blocks_fetched(&self, blocks: u64) {
        self.local_blocks_fetched.fetch_add(blocks, Ordering::Relaxed);
    }

    fn inc_fetch_wait_time(&self, wait: Duration) {
        let nanos = u64::try_from(wait.as_nanos()).unwrap_or(u64::MAX);
        self.fetch_wait_nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}
