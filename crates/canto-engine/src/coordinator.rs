//! Coordination manager.
//!
//! The bus subscriber that turns cache-invalidation batches into Level 1
//! staleness and Critical refetches. For every address the entry is marked
//! stale before its fetch is queued, so a fetch already in flight for the old
//! version can never be installed as fresh.

use crate::viewport::Viewport;
use async_trait::async_trait;
use canto_cache::{CacheManager, StaleOutcome};
use canto_core::events::RECONNECTED;
use canto_core::ports::{BatchSubscriber, CacheObserver};
use canto_core::{Address, Category, EntryState, EventBatch, FetchRequest, Priority, Result};
use canto_scheduler::{EnqueueOutcome, FetchScheduler};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// What one invalidation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationSummary {
    /// Entries that transitioned into `Stale`.
    pub marked: usize,
    /// Critical fetches queued.
    pub requeued: usize,
}

/// What a reconnection pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconnectSummary {
    pub marked: usize,
    /// Viewport addresses queued for fetch.
    pub requeued: usize,
}

pub struct CoordinationManager {
    cache: CacheManager,
    scheduler: Arc<FetchScheduler>,
    observer: Arc<dyn CacheObserver>,
    viewport: Arc<Viewport>,
}

impl CoordinationManager {
    pub fn new(
        cache: CacheManager,
        scheduler: Arc<FetchScheduler>,
        observer: Arc<dyn CacheObserver>,
        viewport: Arc<Viewport>,
    ) -> Self {
        Self {
            cache,
            scheduler,
            observer,
            viewport,
        }
    }

    /// Mark each address, and every cached address under it, stale and
    /// queue a Critical fetch for it. Each address is handled once.
    pub fn invalidate(&self, addresses: &[Address]) -> InvalidationSummary {
        let mut seen = HashSet::new();
        let mut summary = InvalidationSummary::default();
        for address in addresses {
            let cascade = std::iter::once(address.clone()).chain(self.cache.descendants(address));
            for target in cascade {
                if !seen.insert(target.clone()) {
                    continue;
                }
                if self.mark_stale(&target) {
                    summary.marked += 1;
                }
                if self.enqueue(FetchRequest::critical(target)) {
                    summary.requeued += 1;
                }
            }
        }
        debug!(
            marked = summary.marked,
            requeued = summary.requeued,
            "Invalidation applied"
        );
        summary
    }

    /// Bulk recovery after the connection comes back: every known entry
    /// goes stale and every visible address, cached or not, is refetched at
    /// Critical. Hidden entries wait until referenced.
    pub fn on_reconnected(&self) -> ReconnectSummary {
        let changed = self.cache.mark_all_stale();
        for (address, version) in &changed {
            self.observer.on_stale(address, *version);
        }

        let requeued = self
            .viewport
            .addresses()
            .into_iter()
            .filter(|address| match self.cache.get(address).state {
                EntryState::Missing | EntryState::Stale => {
                    self.enqueue(FetchRequest::critical(address.clone()))
                }
                EntryState::Fetching | EntryState::Fresh | EntryState::Error => false,
            })
            .count();

        let summary = ReconnectSummary {
            marked: changed.len(),
            requeued,
        };
        info!(
            marked = summary.marked,
            requeued = summary.requeued,
            "Reconnected; cache invalidated"
        );
        summary
    }

    /// Queue a fetch for an address the presenter needs: High when never
    /// fetched, Critical when stale. Returns the priority used, if any.
    pub fn reference(&self, address: &Address) -> Option<Priority> {
        let priority = match self.cache.get(address).state {
            EntryState::Missing => Priority::High,
            EntryState::Stale => Priority::Critical,
            EntryState::Fetching | EntryState::Fresh | EntryState::Error => return None,
        };
        self.enqueue(FetchRequest::new(address.clone(), priority))
            .then_some(priority)
    }

    /// Queue speculative work for an address not yet needed.
    pub fn prefetch(&self, address: &Address, priority: Priority) -> bool {
        match self.cache.get(address).state {
            EntryState::Missing | EntryState::Stale => {
                self.enqueue(FetchRequest::new(address.clone(), priority))
            }
            EntryState::Fetching | EntryState::Fresh | EntryState::Error => false,
        }
    }

    /// Reset an `Error` entry and refetch it at Critical. Returns the new
    /// version, or `None` if the entry was not in error.
    pub fn retry(&self, address: &Address) -> Option<u64> {
        let version = self.cache.reset_error(address)?;
        self.observer.on_stale(address, version);
        self.enqueue(FetchRequest::critical(address.clone()));
        info!(%address, version, "Retrying failed entry");
        Some(version)
    }

    pub fn viewport(&self) -> &Arc<Viewport> {
        &self.viewport
    }

    fn mark_stale(&self, address: &Address) -> bool {
        match self.cache.mark_stale(address) {
            StaleOutcome::Marked { version } => {
                self.observer.on_stale(address, version);
                true
            }
            StaleOutcome::AlreadyStale { .. } => false,
        }
    }

    fn enqueue(&self, request: FetchRequest) -> bool {
        !matches!(self.scheduler.enqueue(request), EnqueueOutcome::Closed)
    }
}

#[async_trait]
impl BatchSubscriber for CoordinationManager {
    async fn on_batch(&self, batch: Arc<EventBatch>) -> Result<()> {
        match batch.category {
            Category::CacheInvalidation => {
                self.invalidate(&batch.addresses());
            }
            Category::System if batch.contains_type(RECONNECTED) => {
                self.on_reconnected();
            }
            category => {
                debug!(category = category.as_str(), events = batch.len(), "Batch ignored");
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "coordinator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canto_core::ports::{DataSource, FailureNotifier, NoopObserver};
    use canto_core::{Error, Event, Payload};
    use canto_scheduler::SchedulerConfig;
    use pretty_assertions::assert_eq;

    struct Never;

    #[async_trait]
    impl DataSource for Never {
        async fn fetch(&self, _address: &Address) -> Result<Payload> {
            Err(Error::Internal("unused".to_string()))
        }
    }

    struct Quiet;

    #[async_trait]
    impl FailureNotifier for Quiet {
        async fn on_fetch_exhausted(&self, _address: &Address, _error: &Error) {}
    }

    /// Coordinator whose scheduler is never started, so queued work stays put.
    fn coordinator() -> (CoordinationManager, CacheManager, Arc<FetchScheduler>) {
        let cache = CacheManager::new();
        let scheduler = Arc::new(FetchScheduler::new(
            cache.clone(),
            Arc::new(Never),
            Arc::new(Quiet),
            Arc::new(NoopObserver),
            SchedulerConfig::default(),
        ));
        let manager = CoordinationManager::new(
            cache.clone(),
            Arc::clone(&scheduler),
            Arc::new(NoopObserver),
            Arc::new(Viewport::new()),
        );
        (manager, cache, scheduler)
    }

    fn fresh(cache: &CacheManager, address: &Address) {
        let claimed = cache.begin_fetch(address).unwrap();
        cache.update(address, Payload::from("x"), claimed);
    }

    #[tokio::test]
    async fn test_invalidate_marks_then_queues_critical() {
        let (manager, cache, scheduler) = coordinator();
        let address = Address::root(0);
        fresh(&cache, &address);

        let summary = manager.invalidate(&[address.clone(), address.clone()]);
        assert_eq!(summary, InvalidationSummary { marked: 1, requeued: 1 });
        assert_eq!(cache.get(&address).state, EntryState::Stale);
        assert_eq!(cache.get(&address).version, 2);
        assert_eq!(scheduler.pending_at(Priority::Critical), 1);
    }

    #[tokio::test]
    async fn test_invalidate_cascades_to_cached_descendants() {
        let (manager, cache, scheduler) = coordinator();
        let page = Address::root(0).child(1).unwrap();
        let system = page.child(2).unwrap();
        let elsewhere = Address::root(0).child(5).unwrap();
        fresh(&cache, &system);
        fresh(&cache, &elsewhere);

        let summary = manager.invalidate(&[page.clone()]);
        assert_eq!(summary.marked, 2);
        assert_eq!(cache.get(&system).state, EntryState::Stale);
        assert_eq!(cache.get(&elsewhere).state, EntryState::Fresh);
        assert_eq!(scheduler.pending_at(Priority::Critical), 2);
    }

    #[tokio::test]
    async fn test_reference_priorities() {
        let (manager, cache, scheduler) = coordinator();
        let missing = Address::root(1);
        let stale = Address::root(2);
        let current = Address::root(3);
        cache.mark_stale(&stale);
        fresh(&cache, &current);

        assert_eq!(manager.reference(&missing), Some(Priority::High));
        assert_eq!(manager.reference(&stale), Some(Priority::Critical));
        assert_eq!(manager.reference(&current), None);
        assert!(manager.prefetch(&Address::root(4), Priority::Low));
        assert!(!manager.prefetch(&current, Priority::Normal));
        assert_eq!(scheduler.pending(), 3);
    }

    #[tokio::test]
    async fn test_reconnect_requeues_only_viewport() {
        let (manager, cache, scheduler) = coordinator();
        let addresses: Vec<Address> = (0..10).map(Address::root).collect();
        for address in &addresses {
            fresh(&cache, address);
        }
        manager.viewport().set(addresses[..3].iter().cloned());

        let summary = manager.on_reconnected();
        assert_eq!(summary, ReconnectSummary { marked: 10, requeued: 3 });
        assert!(addresses
            .iter()
            .all(|a| cache.get(a).state == EntryState::Stale));
        assert_eq!(scheduler.pending_at(Priority::Critical), 3);
        assert_eq!(scheduler.pending(), 3);
    }

    #[tokio::test]
    async fn test_reconnect_fetches_uncached_viewport_at_critical() {
        let (manager, cache, scheduler) = coordinator();
        let cached = Address::root(1);
        let uncached = Address::root(2);
        fresh(&cache, &cached);
        manager.viewport().set([cached.clone(), uncached.clone()]);

        let summary = manager.on_reconnected();
        assert_eq!(summary, ReconnectSummary { marked: 1, requeued: 2 });
        assert_eq!(cache.get(&uncached).state, EntryState::Missing);
        assert_eq!(scheduler.pending_at(Priority::Critical), 2);
        assert_eq!(scheduler.pending_at(Priority::High), 0);
    }

    #[tokio::test]
    async fn test_system_batch_triggers_reconnect() {
        let (manager, cache, scheduler) = coordinator();
        let address = Address::root(7);
        fresh(&cache, &address);
        manager.viewport().set([address.clone()]);

        let now = chrono::Utc::now();
        let batch = EventBatch {
            category: Category::System,
            events: vec![Event::new(RECONNECTED, None)],
            window_opened_at: now,
            window_closed_at: now,
        };
        manager.on_batch(Arc::new(batch)).await.unwrap();

        assert_eq!(cache.get(&address).state, EntryState::Stale);
        assert_eq!(scheduler.pending_at(Priority::Critical), 1);
    }

    #[tokio::test]
    async fn test_retry_only_from_error() {
        let (manager, cache, scheduler) = coordinator();
        let address = Address::root(8);
        assert_eq!(manager.retry(&address), None);

        let claimed = cache.begin_fetch(&address).unwrap();
        assert!(cache.record_error(&address, claimed));
        let version = manager.retry(&address).unwrap();
        assert_eq!(version, claimed + 1);
        assert_eq!(cache.get(&address).retry_count, 0);
        assert_eq!(scheduler.pending_at(Priority::Critical), 1);
    }
}
