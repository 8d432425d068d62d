//! Scriptable collaborators for driving a session in tests.

use async_trait::async_trait;
use canto_core::ports::{ArtifactBuilder, BatchSubscriber, DataSource, FailureNotifier};
use canto_core::{Address, Error, EventBatch, Payload, Result};
use canto_engine::{Level2, Presenter};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
struct SourceState {
    failures: Mutex<HashMap<Address, u32>>,
    broken: Mutex<HashSet<Address>>,
    calls: Mutex<HashMap<Address, u32>>,
    order: Mutex<Vec<Address>>,
    generation: AtomicU64,
    latency: Mutex<Duration>,
}

/// Data source whose answers are scripted per address.
///
/// Successful payloads read `"{address}@{generation}"`, so a test can tell
/// which round of data an artifact was built from.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    state: Arc<SourceState>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.state.latency.lock() = latency;
        self
    }

    /// Fail the next `times` fetches of `address` with a network error.
    pub fn fail_times(&self, address: &Address, times: u32) {
        self.state.failures.lock().insert(address.clone(), times);
    }

    /// Fail every fetch of `address` until [`ScriptedSource::recover`].
    pub fn fail_always(&self, address: &Address) {
        self.state.broken.lock().insert(address.clone());
    }

    pub fn recover(&self, address: &Address) {
        self.state.broken.lock().remove(address);
        self.state.failures.lock().remove(address);
    }

    /// Change the data every following fetch returns.
    pub fn set_generation(&self, generation: u64) {
        self.state.generation.store(generation, Ordering::SeqCst);
    }

    pub fn payload_for(&self, address: &Address) -> String {
        format!(
            "{}@{}",
            address,
            self.state.generation.load(Ordering::SeqCst)
        )
    }

    /// Fetches issued for `address` so far.
    pub fn calls(&self, address: &Address) -> u32 {
        self.state.calls.lock().get(address).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.order.lock().len()
    }

    /// Addresses in the order their fetches started.
    pub fn order(&self) -> Vec<Address> {
        self.state.order.lock().clone()
    }

    fn should_fail(&self, address: &Address) -> bool {
        if self.state.broken.lock().contains(address) {
            return true;
        }
        let mut failures = self.state.failures.lock();
        match failures.get_mut(address) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn fetch(&self, address: &Address) -> Result<Payload> {
        *self
            .state
            .calls
            .lock()
            .entry(address.clone())
            .or_insert(0) += 1;
        self.state.order.lock().push(address.clone());

        let latency = *self.state.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.should_fail(address) {
            return Err(Error::Network(format!("scripted failure for {}", address)));
        }
        Ok(Payload::from(self.payload_for(address).as_str()))
    }
}

/// Builds the payload text as the artifact.
pub struct TextArtifactBuilder;

impl ArtifactBuilder for TextArtifactBuilder {
    type Artifact = String;

    fn build(&self, _address: &Address, payload: &Payload) -> Result<String> {
        Ok(String::from_utf8_lossy(payload).into_owned())
    }
}

/// One call to [`Presenter::repaint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repaint {
    pub address: Address,
    /// Level 1 version seen after the lookup.
    pub level1_version: u64,
    /// Version the artifact was built from, when one was available.
    pub artifact_version: Option<u64>,
    pub text: Option<String>,
}

#[derive(Default)]
struct PresenterLog {
    repaints: Vec<Repaint>,
    stale: Vec<(Address, u64)>,
    violations: Vec<String>,
}

/// Presenter that rebuilds on every repaint and checks that whatever Level 2
/// hands back was built from a `Fresh` Level 1 version.
#[derive(Clone, Default)]
pub struct RecordingPresenter {
    log: Arc<Mutex<PresenterLog>>,
}

impl RecordingPresenter {
    pub fn repaints(&self) -> Vec<Repaint> {
        self.log.lock().repaints.clone()
    }

    pub fn repaints_of(&self, address: &Address) -> Vec<Repaint> {
        self.log
            .lock()
            .repaints
            .iter()
            .filter(|r| &r.address == address)
            .cloned()
            .collect()
    }

    /// Stale notices delivered on the affinity thread.
    pub fn stale_notices(&self) -> Vec<(Address, u64)> {
        self.log.lock().stale.clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.log.lock().violations.clone()
    }
}

impl Presenter<String> for RecordingPresenter {
    fn repaint(&mut self, address: &Address, level2: &mut Level2<'_, String>) {
        let before = level2.level1(address);
        let built = level2.lookup_or_build(address);
        let after = level2.level1(address);

        let mut log = self.log.lock();
        let (artifact_version, text) = match built {
            Ok(artifact) => {
                let version = level2.lookup_previous(address).map(|(_, v)| v);
                match version {
                    Some(v) if v < before.version || v > after.version => {
                        log.violations.push(format!(
                            "{address}: artifact v{v} outside level 1 range v{}..=v{}",
                            before.version, after.version
                        ));
                    }
                    Some(v) if before.version == after.version && v != before.version => {
                        log.violations.push(format!(
                            "{address}: artifact v{v} but level 1 is v{}",
                            before.version
                        ));
                    }
                    Some(_) => {}
                    None => log
                        .violations
                        .push(format!("{address}: artifact returned but not retained")),
                }
                (version, Some(artifact.as_ref().clone()))
            }
            Err(e) => {
                if after.is_fresh() && before.version == after.version {
                    log.violations
                        .push(format!("{address}: fresh v{} refused: {e}", after.version));
                }
                debug!(%address, error = %e, "Repaint without artifact");
                (None, None)
            }
        };
        log.repaints.push(Repaint {
            address: address.clone(),
            level1_version: after.version,
            artifact_version,
            text,
        });
    }

    fn on_stale(&mut self, address: &Address, version: u64) {
        self.log.lock().stale.push((address.clone(), version));
    }
}

/// Failure notifier that remembers every exhausted address.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    calls: Arc<Mutex<Vec<(Address, String)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(Address, String)> {
        self.calls.lock().clone()
    }

    pub fn count_for(&self, address: &Address) -> usize {
        self.calls.lock().iter().filter(|(a, _)| a == address).count()
    }
}

#[async_trait]
impl FailureNotifier for RecordingNotifier {
    async fn on_fetch_exhausted(&self, address: &Address, error: &Error) {
        self.calls.lock().push((address.clone(), error.to_string()));
    }
}

/// Bus subscriber that keeps every batch it receives.
#[derive(Default)]
pub struct RecordingSubscriber {
    batches: Mutex<Vec<Arc<EventBatch>>>,
}

impl RecordingSubscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn batches(&self) -> Vec<Arc<EventBatch>> {
        self.batches.lock().clone()
    }

    /// Event count of each batch, in delivery order.
    pub fn sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(|b| b.len()).collect()
    }
}

#[async_trait]
impl BatchSubscriber for RecordingSubscriber {
    async fn on_batch(&self, batch: Arc<EventBatch>) -> Result<()> {
        self.batches.lock().push(batch);
        Ok(())
    }

    fn name(&self) -> &str {
        "recorder"
    }
}
