//! Session setup and polling helpers.

use crate::fixtures::{RecordingNotifier, RecordingPresenter, ScriptedSource, TextArtifactBuilder};
use canto_core::{Address, EntryState};
use canto_engine::{EngineConfig, Session};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default polling deadline for state changes.
pub const SETTLE: Duration = Duration::from_secs(5);

/// Engine configuration with millisecond backoff so retry paths finish fast.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        backoff_base_ms: 1,
        backoff_cap_ms: 5,
        backoff_jitter: 0.0,
        ..Default::default()
    }
}

/// Start a session over the given fixtures with [`fast_config`].
pub async fn start_session(
    source: ScriptedSource,
    presenter: RecordingPresenter,
    notifier: RecordingNotifier,
) -> Session<String> {
    start_session_with(fast_config(), source, presenter, notifier).await
}

pub async fn start_session_with(
    config: EngineConfig,
    source: ScriptedSource,
    presenter: RecordingPresenter,
    notifier: RecordingNotifier,
) -> Session<String> {
    Session::start(
        config,
        Arc::new(source),
        TextArtifactBuilder,
        presenter,
        Arc::new(notifier),
    )
    .await
    .expect("Failed to start session")
}

/// `layout:0/page:{page}/system:{system}`.
pub fn system_address(page: u32, system: u32) -> Address {
    Address::root(0)
        .child(page)
        .and_then(|p| p.child(system))
        .expect("Failed to build address")
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Wait for `address` to reach `state` in Level 1.
pub async fn wait_for_state(session: &Session<String>, address: &Address, state: EntryState) -> bool {
    wait_until(SETTLE, || session.lookup(address).state == state).await
}

/// Reference every address and wait until all of them are `Fresh`.
pub async fn make_fresh(session: &Session<String>, addresses: &[Address]) {
    for address in addresses {
        session.reference(address);
    }
    let settled = wait_until(SETTLE, || {
        addresses.iter().all(|a| session.lookup(a).is_fresh())
    })
    .await;
    assert!(settled, "addresses never became fresh");
}
