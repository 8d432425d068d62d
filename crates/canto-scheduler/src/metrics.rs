//! Metrics for fetch scheduling.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the fetch scheduler.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Requests accepted into a queue.
    pub enqueued: AtomicU64,
    /// Requests shed from a full Normal/Low queue.
    pub dropped: AtomicU64,
    /// Fetch calls started.
    pub started: AtomicU64,
    /// Fetches whose payload was installed.
    pub succeeded: AtomicU64,
    /// Failed attempts that were rescheduled.
    pub retried: AtomicU64,
    /// Requests that ran out of attempts.
    pub exhausted: AtomicU64,
    /// Successful fetches overtaken by a newer invalidation.
    pub superseded: AtomicU64,
    /// Requests skipped because the entry needed no fetch.
    pub skipped: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of scheduler metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SchedulerMetricsSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub started: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub exhausted: u64,
    pub superseded: u64,
    pub skipped: u64,
}
