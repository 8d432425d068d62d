//! Session lifecycle and the presentation-facing API.

use crate::affinity::{AffinityHandle, AffinityThread, Presenter, StaleCallback};
use crate::config::EngineConfig;
use crate::coordinator::{CoordinationManager, ReconnectSummary};
use crate::viewport::Viewport;
use canto_bus::{Batcher, EventIngress, LocalEventBus, MetricsSnapshot, spawn_batcher};
use canto_cache::{CacheManager, CacheStats, ExecutionStats};
use canto_core::ports::{
    ArtifactBuilder, BatchSubscriber, CacheObserver, DataSource, EventBus, FailureNotifier,
};
use canto_core::{
    Address, CacheEntry, Category, Event, Priority, Result, SessionId, SubscriptionId,
};
use canto_scheduler::{FetchScheduler, SchedulerMetricsSnapshot};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub level1: CacheStats,
    pub level2: ExecutionStats,
    pub scheduler: SchedulerMetricsSnapshot,
    pub bus: MetricsSnapshot,
    pub pending_fetches: usize,
}

/// One connection's worth of cache state and the machinery that keeps it
/// in sync.
pub struct Session<A: Send + Sync + 'static> {
    id: SessionId,
    cache: CacheManager,
    bus: Arc<LocalEventBus>,
    scheduler: Arc<FetchScheduler>,
    coordinator: Arc<CoordinationManager>,
    affinity: AffinityThread<A>,
    ingress: EventIngress,
    batcher: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

impl<A: Send + Sync + 'static> Session<A> {
    /// Build and start every component. Must be called inside a tokio
    /// runtime.
    pub async fn start<B, P>(
        config: EngineConfig,
        source: Arc<dyn DataSource>,
        builder: B,
        presenter: P,
        notifier: Arc<dyn FailureNotifier>,
    ) -> Result<Self>
    where
        B: ArtifactBuilder<Artifact = A>,
        P: Presenter<A>,
    {
        config.validate()?;
        let id = SessionId::new();
        let cache = CacheManager::new();

        let affinity = AffinityThread::spawn(cache.view(), builder, presenter, config.l2_capacity)?;
        let observer: Arc<dyn CacheObserver> = Arc::new(affinity.handle().clone());

        let scheduler = Arc::new(FetchScheduler::new(
            cache.clone(),
            source,
            notifier,
            Arc::clone(&observer),
            config.scheduler_config(),
        ));
        scheduler.start();

        let bus_config = config.bus_config();
        let bus = Arc::new(LocalEventBus::new(&bus_config));
        let coordinator = Arc::new(CoordinationManager::new(
            cache.clone(),
            Arc::clone(&scheduler),
            observer,
            Arc::new(Viewport::new()),
        ));
        bus.subscribe(Category::CacheInvalidation, coordinator.clone())
            .await?;
        bus.subscribe(Category::System, coordinator.clone()).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (ingress, events) = EventIngress::channel(bus_config.ingress_buffer);
        let batcher = Batcher::new(bus_config.windows.clone(), Arc::clone(bus.metrics()));
        let batcher = spawn_batcher(events, bus.clone(), batcher, shutdown_rx);

        info!(session = %id, workers = config.effective_workers(), "Session started");
        Ok(Self {
            id,
            cache,
            bus,
            scheduler,
            coordinator,
            affinity,
            ingress,
            batcher: Mutex::new(Some(batcher)),
            shutdown_tx,
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Handle for the connection layer to push events into.
    pub fn ingress(&self) -> EventIngress {
        self.ingress.clone()
    }

    pub async fn submit(&self, event: Event) -> Result<()> {
        self.ingress.submit(event).await
    }

    /// Level 1 entry for `address`. Never blocks.
    pub fn lookup(&self, address: &Address) -> Arc<CacheEntry> {
        self.cache.get(address)
    }

    /// Valid Level 2 artifact, derived on the affinity thread if needed.
    pub async fn lookup_or_build(&self, address: &Address) -> Result<Arc<A>> {
        self.affinity.handle().lookup_or_build(address).await
    }

    /// Last artifact built for `address`, for display next to a staleness
    /// indicator while a refetch is pending.
    pub async fn lookup_previous(&self, address: &Address) -> Result<Option<(Arc<A>, u64)>> {
        self.affinity.handle().lookup_previous(address).await
    }

    pub fn affinity(&self) -> &AffinityHandle<A> {
        self.affinity.handle()
    }

    /// Register a callback run on the affinity thread whenever `address`
    /// goes stale.
    pub fn on_stale(
        &self,
        address: Address,
        callback: impl FnMut(&Address, u64) + Send + 'static,
    ) -> Result<()> {
        let callback: StaleCallback = Box::new(callback);
        self.affinity.handle().add_stale_hook(address, callback)
    }

    pub fn request_repaint(&self, address: Address) -> Result<()> {
        self.affinity.handle().request_repaint(address)
    }

    /// Replace the set of visible addresses.
    pub fn set_viewport(&self, addresses: impl IntoIterator<Item = Address>) {
        self.coordinator.viewport().set(addresses);
    }

    pub fn reference(&self, address: &Address) -> Option<Priority> {
        self.coordinator.reference(address)
    }

    pub fn prefetch(&self, address: &Address, priority: Priority) -> bool {
        self.coordinator.prefetch(address, priority)
    }

    /// User-triggered retry of a failed entry.
    pub fn retry(&self, address: &Address) -> Option<u64> {
        self.coordinator.retry(address)
    }

    pub fn on_reconnected(&self) -> ReconnectSummary {
        self.coordinator.on_reconnected()
    }

    /// Attach another subscriber, e.g. for presence or document batches.
    pub async fn subscribe(
        &self,
        category: Category,
        subscriber: Arc<dyn BatchSubscriber>,
    ) -> Result<SubscriptionId> {
        self.bus.subscribe(category, subscriber).await
    }

    /// Shrink Level 2 under memory pressure.
    pub async fn trim_l2(&self, max: usize) -> Result<usize> {
        self.affinity.handle().trim(max).await
    }

    pub async fn stats(&self) -> Result<SessionStats> {
        Ok(SessionStats {
            level1: self.cache.stats(),
            level2: self.affinity.handle().stats().await?,
            scheduler: self.scheduler.metrics(),
            bus: self.bus.metrics().snapshot(),
            pending_fetches: self.scheduler.pending(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop every component and evict all Level 1 entries.
    ///
    /// Events already submitted are flushed through the coordinator first.
    /// In-flight fetches finish but their results are discarded with the
    /// cache.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session = %self.id, "Closing session");

        let _ = self.shutdown_tx.send(true);
        let batcher = self.batcher.lock().take();
        if let Some(handle) = batcher
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Batcher ended abnormally");
        }
        self.bus.shutdown().await;
        self.scheduler.shutdown().await;
        self.affinity.shutdown().await;
        self.cache.clear();

        info!(session = %self.id, "Session closed");
    }
}
