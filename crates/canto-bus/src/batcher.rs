//! Event categorization and time-windowed batching.
//!
//! Each incoming event is classified by its type tag and appended to the open
//! batch for its category. The first event of a category opens a window of
//! that category's fixed length; when the window expires the batch is closed
//! and published exactly once. Categories with a zero window publish every
//! event immediately. An empty window never publishes.

use crate::config::WindowPolicy;
use crate::metrics::BusMetrics;
use canto_core::ports::EventBus;
use canto_core::{Category, Error, Event, EventBatch, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

struct OpenBatch {
    events: Vec<Event>,
    opened_at: DateTime<Utc>,
    deadline: Instant,
}

impl OpenBatch {
    fn close(self, category: Category) -> EventBatch {
        EventBatch {
            category,
            events: self.events,
            window_opened_at: self.opened_at,
            window_closed_at: Utc::now(),
        }
    }
}

/// Per-category batch accumulator. Purely synchronous; time is passed in.
pub struct Batcher {
    policy: WindowPolicy,
    open: BTreeMap<Category, OpenBatch>,
    metrics: Arc<BusMetrics>,
}

impl Batcher {
    pub fn new(policy: WindowPolicy, metrics: Arc<BusMetrics>) -> Self {
        Self {
            policy,
            open: BTreeMap::new(),
            metrics,
        }
    }

    /// Accept one event. Returns a batch when the event's category publishes
    /// immediately.
    ///
    /// Malformed events are logged and dropped.
    pub fn push(&mut self, event: Event, now: Instant) -> Option<EventBatch> {
        if let Err(e) = event.check_scope() {
            warn!(event_type = %event.event_type, error = %e, "Dropping malformed event");
            self.metrics.record_dropped();
            return None;
        }
        self.metrics.record_accepted();

        let category = event.category();
        let window = self.policy.window(category);
        if window.is_zero() {
            let at = Utc::now();
            return Some(EventBatch {
                category,
                events: vec![event],
                window_opened_at: at,
                window_closed_at: at,
            });
        }

        self.open
            .entry(category)
            .or_insert_with(|| OpenBatch {
                events: Vec::new(),
                opened_at: Utc::now(),
                deadline: now + window,
            })
            .events
            .push(event);
        None
    }

    /// Earliest expiry among open windows.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.open.values().map(|batch| batch.deadline).min()
    }

    /// Close every window that has expired by `now`.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<EventBatch> {
        let expired: Vec<Category> = self
            .open
            .iter()
            .filter(|(_, batch)| batch.deadline <= now)
            .map(|(category, _)| *category)
            .collect();
        expired
            .into_iter()
            .filter_map(|category| {
                self.open
                    .remove(&category)
                    .map(|batch| batch.close(category))
            })
            .collect()
    }

    /// Close every open window regardless of expiry.
    pub fn flush(&mut self) -> Vec<EventBatch> {
        std::mem::take(&mut self.open)
            .into_iter()
            .map(|(category, batch)| batch.close(category))
            .collect()
    }

    pub fn open_categories(&self) -> Vec<Category> {
        self.open.keys().copied().collect()
    }
}

/// Sending side of the ingress stream.
#[derive(Clone)]
pub struct EventIngress {
    tx: mpsc::Sender<Event>,
}

impl EventIngress {
    /// Create an ingress handle and the receiver the batcher consumes.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    /// Submit one event, waiting for buffer space.
    pub async fn submit(&self, event: Event) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| Error::EventBus("ingress closed".to_string()))
    }
}

/// Run a batcher over `events` until the channel closes or shutdown is
/// signalled, publishing closed batches to `bus`. Open windows are flushed on
/// exit.
pub fn spawn_batcher(
    mut events: mpsc::Receiver<Event>,
    bus: Arc<dyn EventBus>,
    mut batcher: Batcher,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Batcher started");
        loop {
            let deadline = batcher.next_deadline();
            tokio::select! {
                received = events.recv() => match received {
                    Some(event) => {
                        if let Some(batch) = batcher.push(event, Instant::now()) {
                            publish(bus.as_ref(), batch).await;
                        }
                    }
                    None => break,
                },
                _ = sleep_until(deadline) => {
                    for batch in batcher.drain_expired(Instant::now()) {
                        publish(bus.as_ref(), batch).await;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        for batch in batcher.flush() {
            publish(bus.as_ref(), batch).await;
        }
        info!("Batcher stopped");
    })
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn publish(bus: &dyn EventBus, batch: EventBatch) {
    let category = batch.category;
    let size = batch.len();
    match bus.publish(batch).await {
        Ok(()) => debug!(?category, size, "Published batch"),
        Err(e) => error!(?category, size, error = %e, "Failed to publish batch"),
    }
}
