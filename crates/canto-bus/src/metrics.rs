//! Metrics for batching and delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for the event bus.
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// Events accepted into an open batch.
    pub events_accepted: AtomicU64,
    /// Events dropped as malformed.
    pub events_dropped: AtomicU64,
    /// Batches published.
    pub batches_published: AtomicU64,
    /// Batch deliveries completed (one per subscriber per batch).
    pub deliveries: AtomicU64,
    /// Deliveries whose subscriber returned an error.
    pub delivery_failures: AtomicU64,
}

impl BusMetrics {
    /// Create new metrics instance.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_accepted(&self) {
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish(&self) {
        self.batches_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self, ok: bool) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.delivery_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            batches_published: self.batches_published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of bus metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub events_accepted: u64,
    pub events_dropped: u64,
    pub batches_published: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
}
