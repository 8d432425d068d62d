//! End-to-end session scenarios.
//!
//! Each test drives a real session (bus, batcher, coordinator, scheduler and
//! affinity thread) against scripted fixtures.

use canto_core::events::RECONNECTED;
use canto_core::{Address, Category, EntryState, Error, Event};
use canto_engine::ReconnectSummary;
use canto_tests::*;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_invalidation_refreshes_both_levels() {
    init_test_logging();
    let source = ScriptedSource::new();
    let presenter = RecordingPresenter::default();
    let session = start_session(source.clone(), presenter.clone(), RecordingNotifier::new()).await;

    let x = system_address(2, 1);
    make_fresh(&session, &[x.clone()]).await;
    assert_eq!(session.lookup(&x).version, 1);
    let first = session.lookup_or_build(&x).await.expect("Failed to build");
    assert_eq!(first.as_str(), "layout:0/page:2/system:1@0");

    let stale_versions = Arc::new(Mutex::new(Vec::new()));
    let hook = Arc::clone(&stale_versions);
    session
        .on_stale(x.clone(), move |_, version| hook.lock().push(version))
        .expect("Failed to register hook");

    source.set_generation(1);
    session
        .submit(Event::invalidated(x.clone()))
        .await
        .expect("Failed to submit");

    let refreshed = wait_until(SETTLE, || {
        let entry = session.lookup(&x);
        entry.is_fresh() && entry.version == 3
    })
    .await;
    assert!(refreshed, "entry never refreshed: {:?}", session.lookup(&x));

    let artifact = session.lookup_or_build(&x).await.expect("Failed to build");
    assert_eq!(artifact.as_str(), "layout:0/page:2/system:1@1");
    let (_, built_from) = session
        .lookup_previous(&x)
        .await
        .expect("Affinity thread gone")
        .expect("No artifact retained");
    assert_eq!(built_from, session.lookup(&x).version);

    assert!(wait_until(SETTLE, || stale_versions.lock().as_slice() == [2]).await);
    assert!(presenter.stale_notices().contains(&(x.clone(), 2)));

    let repainted = wait_until(SETTLE, || {
        presenter
            .repaints_of(&x)
            .last()
            .is_some_and(|r| r.artifact_version == Some(3))
    })
    .await;
    assert!(repainted);
    assert!(presenter.violations().is_empty(), "{:?}", presenter.violations());

    session.close().await;
}

#[tokio::test]
async fn test_exhausted_fetch_notifies_once() {
    init_test_logging();
    let source = ScriptedSource::new();
    let notifier = RecordingNotifier::new();
    let session = start_session(source.clone(), RecordingPresenter::default(), notifier.clone()).await;

    let y = system_address(0, 4);
    source.fail_always(&y);
    session.reference(&y);

    assert!(wait_for_state(&session, &y, EntryState::Error).await);
    assert!(wait_until(SETTLE, || notifier.count_for(&y) == 1).await);
    assert_eq!(source.calls(&y), 5);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(notifier.count_for(&y), 1);
    assert_eq!(source.calls(&y), 5);
    assert_eq!(session.lookup(&y).state, EntryState::Error);

    let result = session.lookup_or_build(&y).await;
    assert!(matches!(
        result,
        Err(Error::NotReady { state: EntryState::Error, .. })
    ));

    let stats = session.stats().await.expect("Failed to read stats");
    assert_eq!(stats.scheduler.exhausted, 1);
    assert_eq!(stats.scheduler.retried, 4);
    assert_eq!(stats.level1.error, 1);

    session.close().await;
}

#[tokio::test]
async fn test_retry_recovers_failed_entry() {
    init_test_logging();
    let source = ScriptedSource::new();
    let notifier = RecordingNotifier::new();
    let session = start_session(source.clone(), RecordingPresenter::default(), notifier.clone()).await;

    let y = system_address(1, 0);
    source.fail_always(&y);
    session.reference(&y);
    assert!(wait_for_state(&session, &y, EntryState::Error).await);

    // Referencing an Error entry must not restart fetching on its own.
    assert_eq!(session.reference(&y), None);

    source.recover(&y);
    let failed_at = session.lookup(&y).version;
    let version = session.retry(&y).expect("Entry was not in error");
    assert_eq!(version, failed_at + 1);
    assert!(wait_for_state(&session, &y, EntryState::Fresh).await);
    assert_eq!(session.lookup(&y).version, version + 1);

    let artifact = session.lookup_or_build(&y).await.expect("Failed to build");
    assert_eq!(artifact.as_str(), source.payload_for(&y));
    assert_eq!(session.retry(&y), None);

    session.close().await;
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    init_test_logging();
    let source = ScriptedSource::new();
    let notifier = RecordingNotifier::new();
    let session = start_session(source.clone(), RecordingPresenter::default(), notifier.clone()).await;

    let z = system_address(3, 3);
    source.fail_times(&z, 3);
    session.reference(&z);

    assert!(wait_for_state(&session, &z, EntryState::Fresh).await);
    assert_eq!(source.calls(&z), 4);
    assert_eq!(session.lookup(&z).retry_count, 0);
    assert!(notifier.calls().is_empty());

    session.close().await;
}

#[tokio::test]
async fn test_reconnect_refetches_only_viewport() {
    init_test_logging();
    let source = ScriptedSource::new();
    let session = start_session(source.clone(), RecordingPresenter::default(), RecordingNotifier::new()).await;

    let addresses: Vec<Address> = (0..10).map(|n| system_address(0, n)).collect();
    make_fresh(&session, &addresses).await;
    let (visible, hidden) = addresses.split_at(3);
    session.set_viewport(visible.iter().cloned());

    let summary = session.on_reconnected();
    assert_eq!(summary, ReconnectSummary { marked: 10, requeued: 3 });

    let refetched = wait_until(SETTLE, || visible.iter().all(|a| session.lookup(a).is_fresh())).await;
    assert!(refetched);
    tokio::time::sleep(Duration::from_millis(50)).await;

    for address in visible {
        assert_eq!(source.calls(address), 2);
        assert_eq!(session.lookup(address).version, 3);
    }
    for address in hidden {
        assert_eq!(session.lookup(address).state, EntryState::Stale);
        assert_eq!(source.calls(address), 1);
    }

    // A hidden address is refetched once it scrolls into view.
    assert_eq!(session.reference(&hidden[0]), Some(canto_core::Priority::Critical));
    assert!(wait_for_state(&session, &hidden[0], EntryState::Fresh).await);

    session.close().await;
}

#[tokio::test]
async fn test_reconnected_event_goes_through_system_window() {
    init_test_logging();
    let source = ScriptedSource::new();
    let session = start_session(source.clone(), RecordingPresenter::default(), RecordingNotifier::new()).await;

    let visible = system_address(5, 0);
    let hidden = system_address(5, 1);
    make_fresh(&session, &[visible.clone(), hidden.clone()]).await;
    session.set_viewport([visible.clone()]);

    session
        .submit(Event::new(RECONNECTED, None))
        .await
        .expect("Failed to submit");

    assert!(wait_for_state(&session, &hidden, EntryState::Stale).await);
    let refreshed = wait_until(SETTLE, || {
        let entry = session.lookup(&visible);
        entry.is_fresh() && entry.version == 3
    })
    .await;
    assert!(refreshed);

    session.close().await;
}

#[tokio::test]
async fn test_burst_is_delivered_as_one_batch() {
    init_test_logging();
    let session = start_session(
        ScriptedSource::new(),
        RecordingPresenter::default(),
        RecordingNotifier::new(),
    )
    .await;

    let recorder = RecordingSubscriber::new();
    session
        .subscribe(Category::CacheInvalidation, recorder.clone())
        .await
        .expect("Failed to subscribe");

    for n in 0..10 {
        session
            .submit(Event::invalidated(system_address(7, n)))
            .await
            .expect("Failed to submit");
    }

    assert!(wait_until(SETTLE, || !recorder.sizes().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.sizes(), vec![10]);

    let batch = &recorder.batches()[0];
    assert_eq!(batch.category, Category::CacheInvalidation);
    assert!(batch.window_closed_at >= batch.window_opened_at);

    let stats = session.stats().await.expect("Failed to read stats");
    assert_eq!(stats.bus.events_accepted, 10);
    assert_eq!(stats.bus.batches_published, 1);

    session.close().await;
}
