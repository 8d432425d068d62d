//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the synchronization core and
//! its external collaborators.

use crate::address::Address;
use crate::entry::Payload;
use crate::events::{Category, EventBatch};
use crate::ids::SubscriptionId;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Receives completed batches from the bus.
#[async_trait]
pub trait BatchSubscriber: Send + Sync {
    /// Handle one batch. Errors are logged by the bus and never retried.
    async fn on_batch(&self, batch: Arc<EventBatch>) -> Result<()>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "subscriber"
    }
}

/// Event bus delivering batches to per-category subscribers.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Deliver a batch to every current subscriber of its category.
    async fn publish(&self, batch: EventBatch) -> Result<()>;

    /// Subscribe to one category.
    async fn subscribe(
        &self,
        category: Category,
        subscriber: Arc<dyn BatchSubscriber>,
    ) -> Result<SubscriptionId>;
}

/// The authoritative remote source of payloads.
///
/// Must be idempotent: the same address yields the same payload unless an
/// invalidation happened in between.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, address: &Address) -> Result<Payload>;
}

/// Collaborator told once about each permanently failed fetch.
#[async_trait]
pub trait FailureNotifier: Send + Sync {
    async fn on_fetch_exhausted(&self, address: &Address, error: &Error);
}

/// Observer of Level 1 transitions that concern the presentation layer.
///
/// Implementations must not block: they are called from background workers.
pub trait CacheObserver: Send + Sync {
    /// The entry was marked stale at `version`.
    fn on_stale(&self, address: &Address, version: u64);

    /// A fresh payload was installed at `version`.
    fn on_refreshed(&self, address: &Address, version: u64);
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CacheObserver for NoopObserver {
    fn on_stale(&self, _address: &Address, _version: u64) {}
    fn on_refreshed(&self, _address: &Address, _version: u64) {}
}

/// Derives execution-ready artifacts from raw payloads.
///
/// Runs only on the affinity thread.
pub trait ArtifactBuilder: Send + 'static {
    type Artifact: Send + Sync + 'static;

    fn build(&self, address: &Address, payload: &Payload) -> Result<Self::Artifact>;
}
