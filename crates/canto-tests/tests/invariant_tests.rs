//! Cross-component guarantees: Level 2 validity, version monotonicity,
//! affinity confinement and session teardown.

use canto_cache::CacheManager;
use canto_core::affinity::is_affinity_thread;
use canto_core::{Address, EntryState, Error, Event};
use canto_engine::{AffinityThread, ReconnectSummary};
use canto_tests::*;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test]
async fn test_level2_refuses_entries_that_are_not_fresh() {
    init_test_logging();
    let source = ScriptedSource::new().with_latency(Duration::from_millis(20));
    let session = start_session(source.clone(), RecordingPresenter::default(), RecordingNotifier::new()).await;

    let missing = system_address(9, 9);
    let result = session.lookup_or_build(&missing).await;
    assert!(matches!(
        result,
        Err(Error::NotReady { state: EntryState::Missing, .. })
    ));

    let x = system_address(0, 0);
    make_fresh(&session, &[x.clone()]).await;
    session.lookup_or_build(&x).await.expect("Failed to build");

    session
        .submit(Event::invalidated(x.clone()))
        .await
        .expect("Failed to submit");
    let left_fresh = wait_until(SETTLE, || !session.lookup(&x).is_fresh()).await;
    assert!(left_fresh);

    // While the refetch is pending only the previous artifact is offered.
    let (previous, built_from) = session
        .lookup_previous(&x)
        .await
        .expect("Affinity thread gone")
        .expect("No previous artifact");
    assert!(previous.starts_with("layout:0/page:0/system:0@"));
    assert!(built_from <= session.lookup(&x).version);

    session.close().await;
}

#[tokio::test]
async fn test_presenter_only_sees_valid_artifacts_under_churn() {
    init_test_logging();
    let source = ScriptedSource::new().with_latency(Duration::from_millis(1));
    let presenter = RecordingPresenter::default();
    let session = start_session(source.clone(), presenter.clone(), RecordingNotifier::new()).await;

    let addresses: Vec<Address> = (0..8).map(|n| system_address(1, n)).collect();
    make_fresh(&session, &addresses).await;
    source.fail_times(&addresses[2], 2);
    source.fail_times(&addresses[5], 3);

    for round in 0..40u32 {
        source.set_generation(u64::from(round) + 1);
        let address = addresses[(round as usize * 3) % addresses.len()].clone();
        session
            .submit(Event::invalidated(address))
            .await
            .expect("Failed to submit");
        if round % 4 == 3 {
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
    }

    let settled = wait_until(Duration::from_secs(10), || {
        addresses.iter().all(|a| session.lookup(a).is_fresh())
    })
    .await;
    assert!(settled, "entries never settled");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(presenter.violations().is_empty(), "{:?}", presenter.violations());
    for address in &addresses {
        let entry = session.lookup(address);
        assert_eq!(entry.state, EntryState::Fresh);
        let artifact = session.lookup_or_build(address).await.expect("Failed to build");
        assert!(artifact.starts_with(&format!("{}@", address)));
        let (_, built_from) = session
            .lookup_previous(address)
            .await
            .expect("Affinity thread gone")
            .expect("No artifact retained");
        assert_eq!(built_from, entry.version);
    }

    let stats = session.stats().await.expect("Failed to read stats");
    assert_eq!(stats.level1.error, 0);
    assert!(stats.level2.builds >= addresses.len() as u64);

    session.close().await;
}

#[tokio::test]
async fn test_versions_never_go_backwards() {
    init_test_logging();
    let source = ScriptedSource::new().with_latency(Duration::from_millis(1));
    let session = start_session(source.clone(), RecordingPresenter::default(), RecordingNotifier::new()).await;

    let x = system_address(4, 2);
    make_fresh(&session, &[x.clone()]).await;

    let ingress = session.ingress();
    let target = x.clone();
    let producer = tokio::spawn(async move {
        for _ in 0..20 {
            ingress
                .submit(Event::invalidated(target.clone()))
                .await
                .expect("Failed to submit");
            tokio::time::sleep(Duration::from_millis(7)).await;
        }
    });

    let mut last = session.lookup(&x).version;
    let deadline = Instant::now() + Duration::from_millis(400);
    while Instant::now() < deadline {
        let version = session.lookup(&x).version;
        assert!(version >= last, "version went from {} to {}", last, version);
        last = version;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    producer.await.expect("Producer panicked");

    assert!(wait_for_state(&session, &x, EntryState::Fresh).await);
    assert!(session.lookup(&x).version > 1);

    session.close().await;
}

#[tokio::test]
async fn test_reconnect_is_idempotent() {
    init_test_logging();
    let session = start_session(
        ScriptedSource::new(),
        RecordingPresenter::default(),
        RecordingNotifier::new(),
    )
    .await;

    let addresses: Vec<Address> = (0..4).map(|n| system_address(2, n)).collect();
    make_fresh(&session, &addresses).await;

    assert_eq!(session.on_reconnected(), ReconnectSummary { marked: 4, requeued: 0 });
    let versions: Vec<u64> = addresses.iter().map(|a| session.lookup(a).version).collect();

    assert_eq!(session.on_reconnected(), ReconnectSummary { marked: 0, requeued: 0 });
    let again: Vec<u64> = addresses.iter().map(|a| session.lookup(a).version).collect();
    assert_eq!(versions, again);

    session.close().await;
}

#[tokio::test]
async fn test_level2_work_runs_on_affinity_thread() {
    init_test_logging();
    let session = start_session(
        ScriptedSource::new(),
        RecordingPresenter::default(),
        RecordingNotifier::new(),
    )
    .await;

    let on_thread = session
        .affinity()
        .run(|_| is_affinity_thread())
        .await
        .expect("Affinity thread gone");
    assert!(on_thread);
    assert!(!is_affinity_thread());

    let name = session
        .affinity()
        .run(|_| std::thread::current().name().map(str::to_string))
        .await
        .expect("Affinity thread gone");
    assert_eq!(name.as_deref(), Some("canto-affinity"));

    session.close().await;
}

#[cfg(debug_assertions)]
#[tokio::test]
async fn test_level1_mutation_from_affinity_thread_panics() {
    init_test_logging();
    let cache = CacheManager::new();
    let affinity = AffinityThread::spawn(
        cache.view(),
        TextArtifactBuilder,
        RecordingPresenter::default(),
        16,
    )
    .expect("Failed to spawn affinity thread");

    let writer = cache.clone();
    let panicked = affinity
        .handle()
        .run(move |_| {
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                writer.mark_stale(&Address::root(0));
            }))
            .is_err()
        })
        .await
        .expect("Affinity thread gone");
    assert!(panicked);

    // Reads stay allowed there.
    let state = affinity
        .handle()
        .run(|level2| level2.level1(&Address::root(1)).state)
        .await
        .expect("Affinity thread gone");
    assert_eq!(state, EntryState::Missing);

    affinity.shutdown().await;
}

#[tokio::test]
async fn test_close_tears_everything_down() {
    init_test_logging();
    let session = start_session(
        ScriptedSource::new(),
        RecordingPresenter::default(),
        RecordingNotifier::new(),
    )
    .await;

    let x = system_address(6, 6);
    make_fresh(&session, &[x.clone()]).await;

    session.close().await;
    assert!(session.is_closed());
    assert_eq!(session.lookup(&x).state, EntryState::Missing);
    assert!(session.submit(Event::invalidated(x.clone())).await.is_err());
    assert!(matches!(
        session.lookup_or_build(&x).await,
        Err(Error::AffinityUnavailable)
    ));
    assert!(session.stats().await.is_err());

    // Closing twice is harmless.
    session.close().await;
}
