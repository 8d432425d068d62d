//! In-process event bus with per-subscriber FIFO delivery.

use async_trait::async_trait;
use canto_core::ports::{BatchSubscriber, EventBus};
use canto_core::{Category, Error, EventBatch, Result, SubscriptionId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BusConfig;
use crate::metrics::BusMetrics;

struct Subscription {
    id: SubscriptionId,
    name: String,
    tx: mpsc::UnboundedSender<Arc<EventBatch>>,
}

/// Event bus that fans batches out to subscribers in the same process.
///
/// Each subscription owns a queue drained by one task, so a subscriber sees
/// batches of a category in publish order. Deliveries across subscriptions
/// run concurrently, bounded by `delivery_concurrency`. A slow subscriber
/// delays only its own queue.
pub struct LocalEventBus {
    subscriptions: RwLock<HashMap<Category, Vec<Subscription>>>,
    permits: Arc<Semaphore>,
    metrics: Arc<BusMetrics>,
    shutdown: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalEventBus {
    pub fn new(config: &BusConfig) -> Self {
        Self::with_metrics(config, BusMetrics::new())
    }

    /// Create a bus sharing `metrics` with other components, such as the
    /// batcher feeding it.
    pub fn with_metrics(config: &BusConfig, metrics: Arc<BusMetrics>) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(config.delivery_concurrency)),
            metrics,
            shutdown: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }

    pub async fn subscriber_count(&self, category: Category) -> usize {
        self.subscriptions
            .read()
            .await
            .get(&category)
            .map_or(0, Vec::len)
    }

    /// Remove a subscription. Batches already queued for it are still
    /// delivered.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        for list in subscriptions.values_mut() {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                let removed = list.remove(pos);
                info!(subscription = %id, subscriber = %removed.name, "Unsubscribed");
                return true;
            }
        }
        false
    }

    /// Stop accepting batches and wait for queued deliveries to finish.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down event bus");
        self.subscriptions.write().await.clear();
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Delivery task ended abnormally");
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn publish(&self, batch: EventBatch) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::EventBus("Event bus is shut down".to_string()));
        }
        if batch.is_empty() {
            return Ok(());
        }

        let category = batch.category;
        let batch = Arc::new(batch);
        let subscriptions = self.subscriptions.read().await;
        let targets = subscriptions.get(&category).map_or(&[][..], Vec::as_slice);
        for subscription in targets {
            if subscription.tx.send(Arc::clone(&batch)).is_err() {
                warn!(subscriber = %subscription.name, "Delivery queue closed");
            }
        }
        self.metrics.record_publish();
        debug!(
            category = category.as_str(),
            events = batch.len(),
            subscribers = targets.len(),
            "Batch published"
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        category: Category,
        subscriber: Arc<dyn BatchSubscriber>,
    ) -> Result<SubscriptionId> {
        if self.is_shutdown() {
            return Err(Error::EventBus("Event bus is shut down".to_string()));
        }

        let id = SubscriptionId::new();
        let name = subscriber.name().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(deliver(
            category,
            subscriber,
            rx,
            Arc::clone(&self.permits),
            Arc::clone(&self.metrics),
        ));
        self.tasks.lock().await.push(handle);
        self.subscriptions
            .write()
            .await
            .entry(category)
            .or_default()
            .push(Subscription {
                id,
                name: name.clone(),
                tx,
            });

        info!(subscription = %id, subscriber = %name, category = category.as_str(), "Subscribed");
        Ok(id)
    }
}

async fn deliver(
    category: Category,
    subscriber: Arc<dyn BatchSubscriber>,
    mut rx: mpsc::UnboundedReceiver<Arc<EventBatch>>,
    permits: Arc<Semaphore>,
    metrics: Arc<BusMetrics>,
) {
    while let Some(batch) = rx.recv().await {
        let Ok(_permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let result = subscriber.on_batch(batch).await;
        metrics.record_delivery(result.is_ok());
        if let Err(e) = result {
            error!(
                subscriber = subscriber.name(),
                category = category.as_str(),
                error = %e,
                "Subscriber failed to handle batch"
            );
        }
    }
    debug!(subscriber = subscriber.name(), "Delivery task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use canto_core::{Address, Event};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: std::sync::Mutex<Vec<usize>>,
        fail: bool,
    }

    #[async_trait]
    impl BatchSubscriber for Recorder {
        async fn on_batch(&self, batch: Arc<EventBatch>) -> Result<()> {
            self.seen.lock().unwrap().push(batch.len());
            if self.fail {
                return Err(Error::Internal("boom".to_string()));
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    fn batch(category: Category, size: u32) -> EventBatch {
        let now = chrono::Utc::now();
        EventBatch {
            category,
            events: (0..size)
                .map(|i| Event::invalidated(Address::root(i)))
                .collect(),
            window_opened_at: now,
            window_closed_at: now,
        }
    }

    #[tokio::test]
    async fn test_fifo_delivery_per_subscriber() {
        let bus = LocalEventBus::new(&BusConfig::default());
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(Category::CacheInvalidation, recorder.clone())
            .await
            .unwrap();

        for size in 1..=5 {
            bus.publish(batch(Category::CacheInvalidation, size))
                .await
                .unwrap();
        }
        bus.publish(batch(Category::Presence, 9)).await.unwrap();
        bus.shutdown().await;

        assert_eq!(*recorder.seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(bus.metrics().snapshot().deliveries, 5);
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_others() {
        let bus = LocalEventBus::new(&BusConfig::default());
        let failing = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let healthy = Arc::new(Recorder::default());
        bus.subscribe(Category::Document, failing.clone()).await.unwrap();
        bus.subscribe(Category::Document, healthy.clone()).await.unwrap();

        bus.publish(batch(Category::Document, 2)).await.unwrap();
        bus.publish(batch(Category::Document, 3)).await.unwrap();
        bus.shutdown().await;

        assert_eq!(*failing.seen.lock().unwrap(), vec![2, 3]);
        assert_eq!(*healthy.seen.lock().unwrap(), vec![2, 3]);
        assert_eq!(bus.metrics().snapshot().delivery_failures, 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_and_shutdown() {
        let bus = LocalEventBus::new(&BusConfig::default());
        let recorder = Arc::new(Recorder::default());
        let id = bus
            .subscribe(Category::Interaction, recorder.clone())
            .await
            .unwrap();
        assert_eq!(bus.subscriber_count(Category::Interaction).await, 1);
        assert!(bus.unsubscribe(id).await);
        assert!(!bus.unsubscribe(id).await);

        bus.publish(batch(Category::Interaction, 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(recorder.seen.lock().unwrap().is_empty());

        bus.shutdown().await;
        assert!(bus.publish(batch(Category::Interaction, 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_batcher_to_bus_scenario() {
        use crate::batcher::{Batcher, EventIngress, spawn_batcher};
        use crate::config::WindowPolicy;
        use tokio::sync::watch;

        let metrics = BusMetrics::new();
        let bus = Arc::new(LocalEventBus::with_metrics(
            &BusConfig::default(),
            metrics.clone(),
        ));
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(Category::CacheInvalidation, recorder.clone())
            .await
            .unwrap();

        let (ingress, rx) = EventIngress::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let batcher = Batcher::new(WindowPolicy::default(), metrics.clone());
        let handle = spawn_batcher(rx, bus.clone(), batcher, shutdown_rx);

        for i in 0..10 {
            ingress
                .submit(Event::invalidated(Address::root(i)))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let _ = shutdown_tx.send(true);
        handle.await.unwrap();
        bus.shutdown().await;

        assert_eq!(*recorder.seen.lock().unwrap(), vec![10]);
        assert_eq!(metrics.snapshot().events_accepted, 10);
        assert_eq!(metrics.snapshot().batches_published, 1);
    }
}
