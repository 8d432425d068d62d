//! Fetch worker pool.

use crate::config::SchedulerConfig;
use crate::metrics::{SchedulerMetrics, SchedulerMetricsSnapshot};
use crate::queue::{EnqueueOutcome, PriorityQueues};

use canto_cache::{CacheManager, UpdateOutcome};
use canto_core::ports::{CacheObserver, DataSource, FailureNotifier};
use canto_core::{Error, FetchRequest, Priority};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct Shared {
    queues: PriorityQueues,
    cache: CacheManager,
    source: Arc<dyn DataSource>,
    notifier: Arc<dyn FailureNotifier>,
    observer: Arc<dyn CacheObserver>,
    config: SchedulerConfig,
    metrics: Arc<SchedulerMetrics>,
    /// Retries sleeping until their backoff elapses.
    delayed: Mutex<JoinSet<()>>,
}

/// Bounded pool of workers draining the priority queues.
///
/// Every successful fetch goes through [`CacheManager::update`]; results are
/// never handed to Level 2 directly.
pub struct FetchScheduler {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl FetchScheduler {
    pub fn new(
        cache: CacheManager,
        source: Arc<dyn DataSource>,
        notifier: Arc<dyn FailureNotifier>,
        observer: Arc<dyn CacheObserver>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                queues: PriorityQueues::new(config.queue_capacity),
                cache,
                source,
                notifier,
                observer,
                config,
                metrics: SchedulerMetrics::new(),
                delayed: Mutex::new(JoinSet::new()),
            }),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool on the current runtime.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        let count = self.shared.config.workers;
        info!(workers = count, "Starting fetch workers");
        for id in 0..count {
            let shared = Arc::clone(&self.shared);
            let shutdown = self.shutdown_tx.subscribe();
            workers.push(tokio::spawn(run_worker(id, shared, shutdown)));
        }
    }

    /// Queue a request. Requests with a future `not_before` are held back
    /// until due.
    pub fn enqueue(&self, request: FetchRequest) -> EnqueueOutcome {
        self.shared.enqueue(request)
    }

    pub fn pending(&self) -> usize {
        self.shared.queues.len()
    }

    pub fn pending_at(&self, priority: Priority) -> usize {
        self.shared.queues.len_of(priority)
    }

    pub fn metrics(&self) -> SchedulerMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Stop the workers. In-flight fetches finish first; retries still
    /// waiting out their backoff are cancelled.
    pub async fn shutdown(&self) {
        info!("Stopping fetch workers");
        let _ = self.shutdown_tx.send(true);
        self.shared.queues.close();
        let mut delayed = std::mem::take(&mut *self.shared.delayed.lock());
        delayed.abort_all();
        while delayed.join_next().await.is_some() {}
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Fetch worker ended abnormally");
            }
        }
    }
}

async fn run_worker(id: usize, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    debug!(worker = id, "Fetch worker started");
    loop {
        let request = tokio::select! {
            _ = shutdown.changed() => break,
            next = shared.queues.pop() => match next {
                Some(request) => request,
                None => break,
            },
        };
        shared.process(request).await;
    }
    debug!(worker = id, "Fetch worker stopped");
}

impl Shared {
    fn enqueue(self: &Arc<Self>, request: FetchRequest) -> EnqueueOutcome {
        if let Some(at) = request.not_before
            && at > Instant::now()
        {
            let mut delayed = self.delayed.lock();
            if self.queues.is_closed() {
                return EnqueueOutcome::Closed;
            }
            while delayed.try_join_next().is_some() {}
            let shared = Arc::clone(self);
            delayed.spawn(async move {
                tokio::time::sleep_until(at).await;
                shared.enqueue(request);
            });
            return EnqueueOutcome::Queued;
        }

        let outcome = self.queues.push(request);
        match &outcome {
            EnqueueOutcome::Queued => SchedulerMetrics::incr(&self.metrics.enqueued),
            EnqueueOutcome::QueuedDroppingOldest(old) => {
                SchedulerMetrics::incr(&self.metrics.enqueued);
                SchedulerMetrics::incr(&self.metrics.dropped);
                warn!(address = %old.address, priority = ?old.priority, "Fetch queue full, dropped oldest request");
            }
            EnqueueOutcome::Closed => debug!("Fetch queue closed, request discarded"),
        }
        outcome
    }

    async fn process(self: &Arc<Self>, request: FetchRequest) {
        let address = &request.address;
        let claim = match request.resume {
            None => self.cache.begin_fetch(address),
            Some(claimed) => self
                .cache
                .resume_fetch(address, claimed)
                .then_some(claimed),
        };
        let Some(claimed) = claim else {
            SchedulerMetrics::incr(&self.metrics.skipped);
            debug!(%address, attempt = request.attempt, "Entry needs no fetch, skipping");
            return;
        };

        SchedulerMetrics::incr(&self.metrics.started);
        debug!(%address, priority = ?request.priority, attempt = request.attempt, "Fetching");

        match self.source.fetch(address).await {
            Ok(payload) => match self.cache.update(address, payload, claimed) {
                UpdateOutcome::Installed { version } => {
                    SchedulerMetrics::incr(&self.metrics.succeeded);
                    self.observer.on_refreshed(address, version);
                }
                UpdateOutcome::Superseded { current } => {
                    SchedulerMetrics::incr(&self.metrics.superseded);
                    debug!(%address, claimed, current, "Fetch result superseded");
                }
            },
            Err(error) => self.handle_failure(&request, claimed, error).await,
        }
    }

    /// Every fetch error counts against the claim's attempt budget, which
    /// lives on the entry so a newer invalidation starts a fresh one.
    async fn handle_failure(self: &Arc<Self>, request: &FetchRequest, claimed: u64, error: Error) {
        let address = &request.address;
        let Some(failures) = self.cache.record_retry(address, claimed) else {
            debug!(%address, error = %error, "Entry changed during failed fetch, not retrying");
            return;
        };

        if failures < self.config.max_attempts {
            let delay = self.config.backoff.delay(failures - 1);
            SchedulerMetrics::incr(&self.metrics.retried);
            debug!(%address, attempt = failures, delay_ms = delay.as_millis() as u64, error = %error, "Fetch failed, retrying");
            self.enqueue(request.retry_at(claimed, Instant::now() + delay));
            return;
        }

        if self.cache.record_error(address, claimed) {
            SchedulerMetrics::incr(&self.metrics.exhausted);
            warn!(%address, attempts = failures, error = %error, "Fetch attempts exhausted");
            self.notifier.on_fetch_exhausted(address, &error).await;
        }
    }
}
