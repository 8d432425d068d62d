//! Affinity thread.
//!
//! One dedicated OS thread per session owns the Level 2 cache, the artifact
//! builder and the presenter. Everything that touches Level 2 or asks for a
//! repaint is a [`Command`] on this thread's queue, so Level 2 needs no
//! locking and each command runs to completion before the next starts.
//!
//! The thread only reads Level 1 through a [`CacheView`].

use canto_cache::{CacheView, ExecutionCache, ExecutionStats};
use canto_core::affinity;
use canto_core::ports::{ArtifactBuilder, CacheObserver};
use canto_core::{Address, CacheEntry, Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Callback fired on the affinity thread when an address goes stale.
pub type StaleCallback = Box<dyn FnMut(&Address, u64) + Send + 'static>;

type Job<A> = Box<dyn FnOnce(&mut Level2<'_, A>) + Send + 'static>;

/// Draws using Level 2 artifacts. Runs on the affinity thread.
pub trait Presenter<A: Send + Sync + 'static>: Send + 'static {
    /// Redraw `address`.
    fn repaint(&mut self, address: &Address, level2: &mut Level2<'_, A>);

    /// `address` went stale at `version`; typically shows an indicator.
    fn on_stale(&mut self, _address: &Address, _version: u64) {}
}

/// Level 2 access, only ever lent out on the affinity thread.
pub struct Level2<'a, A: Send + Sync + 'static> {
    cache: &'a mut ExecutionCache<A>,
    view: &'a CacheView,
    builder: &'a dyn ArtifactBuilder<Artifact = A>,
}

impl<A: Send + Sync + 'static> Level2<'_, A> {
    /// Current Level 1 entry.
    pub fn level1(&self, address: &Address) -> Arc<CacheEntry> {
        self.view.get(address)
    }

    /// Valid artifact for `address`, derived now if needed.
    ///
    /// Fails with [`Error::NotReady`] unless the Level 1 entry is `Fresh`.
    pub fn lookup_or_build(&mut self, address: &Address) -> Result<Arc<A>> {
        let entry = self.view.get(address);
        self.cache.get_or_build(&entry, self.builder)
    }

    /// Last installed artifact and the version it was built from, even if
    /// Level 1 has moved on since.
    pub fn lookup_previous(&self, address: &Address) -> Option<(Arc<A>, u64)> {
        self.cache.previous(address)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

enum Command<A: Send + Sync + 'static> {
    /// A fresh payload was installed; drop the artifact and repaint.
    Refreshed { address: Address, version: u64 },
    Stale { address: Address, version: u64 },
    OnStale { address: Address, callback: StaleCallback },
    Repaint { address: Address },
    Trim { max: usize, reply: oneshot::Sender<usize> },
    Stats { reply: oneshot::Sender<ExecutionStats> },
    Run(Job<A>),
    Shutdown,
}

struct Actor<A: Send + Sync + 'static> {
    cache: ExecutionCache<A>,
    view: CacheView,
    builder: Box<dyn ArtifactBuilder<Artifact = A>>,
    presenter: Box<dyn Presenter<A>>,
    stale_hooks: HashMap<Address, Vec<StaleCallback>>,
}

impl<A: Send + Sync + 'static> Actor<A> {
    fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command<A>>) {
        affinity::enter();
        info!("Affinity thread started");
        while let Some(command) = commands.blocking_recv() {
            match command {
                Command::Refreshed { address, version } => {
                    self.cache.invalidate(&address);
                    debug!(%address, version, "Level 2 invalidated");
                    self.repaint(&address);
                }
                Command::Stale { address, version } => {
                    self.presenter.on_stale(&address, version);
                    if let Some(hooks) = self.stale_hooks.get_mut(&address) {
                        for hook in hooks.iter_mut() {
                            hook(&address, version);
                        }
                    }
                }
                Command::OnStale { address, callback } => {
                    self.stale_hooks.entry(address).or_default().push(callback);
                }
                Command::Repaint { address } => self.repaint(&address),
                Command::Trim { max, reply } => {
                    let evicted = self.cache.trim(max);
                    debug!(max, evicted, "Level 2 trimmed");
                    let _ = reply.send(evicted);
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.cache.stats());
                }
                Command::Run(job) => {
                    let mut level2 = Level2 {
                        cache: &mut self.cache,
                        view: &self.view,
                        builder: self.builder.as_ref(),
                    };
                    job(&mut level2);
                }
                Command::Shutdown => break,
            }
        }
        self.cache.clear();
        affinity::leave();
        info!("Affinity thread stopped");
    }

    fn repaint(&mut self, address: &Address) {
        let mut level2 = Level2 {
            cache: &mut self.cache,
            view: &self.view,
            builder: self.builder.as_ref(),
        };
        self.presenter.repaint(address, &mut level2);
    }
}

/// Cloneable sender side of the affinity thread.
pub struct AffinityHandle<A: Send + Sync + 'static> {
    tx: mpsc::UnboundedSender<Command<A>>,
}

impl<A: Send + Sync + 'static> Clone for AffinityHandle<A> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<A: Send + Sync + 'static> AffinityHandle<A> {
    fn send(&self, command: Command<A>) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| Error::AffinityUnavailable)
    }

    /// Run `f` on the affinity thread and return its result.
    pub async fn run<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Level2<'_, A>) -> R + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: Job<A> = Box::new(move |level2: &mut Level2<'_, A>| {
            let _ = reply.send(f(level2));
        });
        self.send(Command::Run(job))?;
        rx.await.map_err(|_| Error::AffinityUnavailable)
    }

    /// Valid artifact for `address`, derived on the affinity thread if needed.
    pub async fn lookup_or_build(&self, address: &Address) -> Result<Arc<A>> {
        let address = address.clone();
        self.run(move |level2| level2.lookup_or_build(&address)).await?
    }

    pub async fn lookup_previous(&self, address: &Address) -> Result<Option<(Arc<A>, u64)>> {
        let address = address.clone();
        self.run(move |level2| level2.lookup_previous(&address)).await
    }

    /// Register a callback fired each time `address` goes stale.
    pub fn add_stale_hook(&self, address: Address, callback: StaleCallback) -> Result<()> {
        self.send(Command::OnStale { address, callback })
    }

    /// Ask the presenter to redraw `address` without touching Level 2.
    pub fn request_repaint(&self, address: Address) -> Result<()> {
        self.send(Command::Repaint { address })
    }

    /// Evict least recently used artifacts down to `max`.
    pub async fn trim(&self, max: usize) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Trim { max, reply })?;
        rx.await.map_err(|_| Error::AffinityUnavailable)
    }

    pub async fn stats(&self) -> Result<ExecutionStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply })?;
        rx.await.map_err(|_| Error::AffinityUnavailable)
    }
}

impl<A: Send + Sync + 'static> CacheObserver for AffinityHandle<A> {
    fn on_stale(&self, address: &Address, version: u64) {
        if self
            .send(Command::Stale {
                address: address.clone(),
                version,
            })
            .is_err()
        {
            debug!(%address, "Affinity thread gone, stale notice dropped");
        }
    }

    fn on_refreshed(&self, address: &Address, version: u64) {
        if self
            .send(Command::Refreshed {
                address: address.clone(),
                version,
            })
            .is_err()
        {
            debug!(%address, "Affinity thread gone, refresh notice dropped");
        }
    }
}

/// The running affinity thread.
pub struct AffinityThread<A: Send + Sync + 'static> {
    handle: AffinityHandle<A>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl<A: Send + Sync + 'static> AffinityThread<A> {
    /// Start the thread. It owns a Level 2 cache bounded to `capacity`.
    pub fn spawn<B, P>(view: CacheView, builder: B, presenter: P, capacity: usize) -> Result<Self>
    where
        B: ArtifactBuilder<Artifact = A>,
        P: Presenter<A>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Actor {
            cache: ExecutionCache::new(capacity),
            view,
            builder: Box::new(builder),
            presenter: Box::new(presenter),
            stale_hooks: HashMap::new(),
        };
        let join = std::thread::Builder::new()
            .name("canto-affinity".to_string())
            .spawn(move || actor.run(rx))?;

        Ok(Self {
            handle: AffinityHandle { tx },
            join: Mutex::new(Some(join)),
        })
    }

    pub fn handle(&self) -> &AffinityHandle<A> {
        &self.handle
    }

    /// Stop the thread after the commands already queued, and wait for it.
    pub async fn shutdown(&self) {
        let Some(join) = self.join.lock().take() else {
            return;
        };
        let _ = self.handle.send(Command::Shutdown);
        match tokio::task::spawn_blocking(move || join.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!("Affinity thread panicked"),
            Err(e) => warn!(error = %e, "Failed to join affinity thread"),
        }
    }
}
