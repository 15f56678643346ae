//! Timing and ordering properties of the waiter and the cleaner, run
//! against the simulated engine on a paused clock.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use shipyard_common::labels::{LabelFilter, session_labels};
use shipyard_common::types::SessionId;
use shipyard_engine::EngineClient;
use shipyard_engine::client::LogSource;
use shipyard_engine::memory::{CallEvent, MemoryEngine, Operation};
use shipyard_engine::spec::ContainerSpec;
use shipyard_runtime::{Cleaner, Deadline, WaitCondition, Waiter};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const INTERVAL: Duration = Duration::from_secs(1);

fn shared(engine: &MemoryEngine) -> Arc<dyn EngineClient> {
    Arc::new(engine.clone())
}

fn labels(session: &str) -> HashMap<String, String> {
    session_labels(&SessionId::new(session))
}

fn cleaner(engine: &MemoryEngine) -> Cleaner {
    let waiter = Waiter::new(shared(engine), INTERVAL);
    Cleaner::new(shared(engine), waiter, CancellationToken::new())
}

// ── Waiting ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn healthy_wait_times_out_within_one_interval_of_deadline() {
    let engine = MemoryEngine::new();
    let id = engine.add_container("web", labels("s1"), true);
    engine.set_health(&id, Some("starting"));
    let waiter = Waiter::new(shared(&engine), INTERVAL);
    let timeout = Duration::from_secs(5);

    let started = Instant::now();
    let deadline = Deadline::after(&CancellationToken::new(), timeout);
    let met = waiter.wait(&WaitCondition::HEALTHY, &id, &deadline).await;
    let elapsed = started.elapsed();

    assert!(!met);
    assert!(elapsed >= timeout, "gave up early: {elapsed:?}");
    assert!(elapsed <= timeout + INTERVAL, "overshot: {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn healthy_wait_returns_once_health_flips() {
    let engine = MemoryEngine::new();
    let id = engine.add_container("web", labels("s1"), true);
    engine.set_health(&id, Some("starting"));
    let waiter = Waiter::new(shared(&engine), INTERVAL);

    let flipper = engine.clone();
    let flipped = id.clone();
    let _task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        flipper.set_health(&flipped, Some("healthy"));
    });

    let started = Instant::now();
    let deadline = Deadline::after(&CancellationToken::new(), Duration::from_secs(30));
    assert!(waiter.wait(&WaitCondition::HEALTHY, &id, &deadline).await);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2500), "returned early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(2500) + INTERVAL, "overshot: {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn faded_away_is_met_without_sleeping() {
    let engine = MemoryEngine::new();
    let id = engine.add_container("job", labels("s1"), false);
    let waiter = Waiter::new(shared(&engine), INTERVAL);

    let started = Instant::now();
    let deadline = Deadline::after(&CancellationToken::new(), Duration::from_secs(10));
    assert!(waiter.wait(&WaitCondition::FADED_AWAY, &id, &deadline).await);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn missing_container_counts_as_faded_away() {
    let engine = MemoryEngine::new();
    let waiter = Waiter::new(shared(&engine), INTERVAL);

    let deadline = Deadline::after(&CancellationToken::new(), Duration::from_secs(10));
    assert!(waiter.wait(&WaitCondition::FADED_AWAY, "gone", &deadline).await);
}

#[tokio::test(start_paused = true)]
async fn root_cancellation_ends_wait_early() {
    let engine = MemoryEngine::new();
    let id = engine.add_container("web", labels("s1"), true);
    let waiter = Waiter::new(shared(&engine), Duration::from_secs(10));
    let root = CancellationToken::new();
    let deadline = Deadline::after(&root, Duration::from_secs(3600));

    let canceller = root.clone();
    let _task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    assert!(!waiter.wait(&WaitCondition::HEALTHY, &id, &deadline).await);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn log_wait_finds_line_split_across_chunks() {
    let engine = MemoryEngine::new();
    let id = engine.add_container("db", labels("s1"), true);
    engine.push_log(&id, LogSource::Stdout, "booting\nready to ");
    engine.push_log(&id, LogSource::Stdout, "accept connections\n");
    let waiter = Waiter::new(shared(&engine), INTERVAL);

    let deadline = Deadline::after(&CancellationToken::new(), Duration::from_secs(5));
    waiter
        .wait_for_log(&id, "ready to accept connections", &deadline)
        .await
        .expect("line should be found");
}

#[tokio::test]
async fn log_wait_finds_character_split_across_chunks() {
    let engine = MemoryEngine::new();
    let id = engine.add_container("web", labels("s1"), true);
    let line = "serveur prêt\n".as_bytes();
    let split = line.iter().position(|&b| b == 0xC3).expect("multi-byte start") + 1;
    engine.push_log_bytes(&id, LogSource::Stdout, &line[..split]);
    engine.push_log_bytes(&id, LogSource::Stdout, &line[split..]);
    let waiter = Waiter::new(shared(&engine), INTERVAL);

    let deadline = Deadline::after(&CancellationToken::new(), Duration::from_secs(5));
    waiter
        .wait_for_log(&id, "prêt", &deadline)
        .await
        .expect("line should be found");
}

#[tokio::test]
async fn log_wait_on_cancelled_deadline_is_cancelled() {
    let engine = MemoryEngine::new();
    let id = engine.add_container("db", labels("s1"), true);
    let waiter = Waiter::new(shared(&engine), INTERVAL);
    let root = CancellationToken::new();
    let deadline = Deadline::after(&root, Duration::from_secs(5));
    root.cancel();

    let err = waiter.wait_for_log(&id, "ready", &deadline).await.unwrap_err();
    assert!(matches!(
        err,
        shipyard_common::error::ShipyardError::Cancelled
    ));
}

#[tokio::test]
async fn log_wait_reports_closed_stream() {
    let engine = MemoryEngine::new();
    let id = engine.add_container("db", labels("s1"), false);
    engine.push_log(&id, LogSource::Stderr, "fatal: bad config\n");
    let waiter = Waiter::new(shared(&engine), INTERVAL);

    let deadline = Deadline::after(&CancellationToken::new(), Duration::from_secs(5));
    let err = waiter
        .wait_for_log(&id, "ready", &deadline)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        shipyard_common::error::ShipyardError::LogClosed { .. }
    ));
}

// ── Cleanup ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stop_phase_runs_containers_concurrently() {
    let latency = Duration::from_secs(2);
    let engine = MemoryEngine::with_latency(latency);
    for i in 0..10 {
        let _ = engine.add_container(&format!("c{i}"), labels("s1"), true);
    }

    let started = Instant::now();
    let report = cleaner(&engine)
        .stop_running_containers(&LabelFilter::domain())
        .await;
    let elapsed = started.elapsed();

    assert_eq!(report.matched, 10);
    assert!(report.is_clean());
    // list, then stop and one inspect per container, all in parallel
    assert!(elapsed < latency * 4, "phase was serialized: {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn every_stop_completes_before_any_remove() {
    let engine = MemoryEngine::with_latency(Duration::from_millis(50));
    for i in 0..5 {
        let _ = engine.add_container(&format!("c{i}"), labels("s1"), true);
    }

    let report = cleaner(&engine).clean(&LabelFilter::domain()).await;
    assert!(report.is_clean());

    let journal = engine.journal();
    let last_stop = journal
        .iter()
        .rposition(|c| c.operation == Operation::StopContainer && c.event == CallEvent::Completed)
        .expect("stops recorded");
    let first_remove = journal
        .iter()
        .position(|c| c.operation == Operation::RemoveContainer && c.event == CallEvent::Received)
        .expect("removes recorded");
    assert!(last_stop < first_remove);
    assert!(engine.container_ids().is_empty());
}

#[tokio::test]
async fn networks_go_after_their_members() {
    let engine = MemoryEngine::new();
    let cancel = CancellationToken::new();
    let net = engine.add_network("backend", labels("s1"));
    let spec = ContainerSpec {
        image: "postgres".into(),
        labels: labels("s1"),
        network_mode: Some("backend".into()),
        ..Default::default()
    };
    let id = engine.create_container("db", &spec, &cancel).await.expect("create");
    engine.start_container(&id, &cancel).await.expect("start");

    let report = cleaner(&engine).clean(&LabelFilter::domain()).await;

    assert!(report.is_clean());
    assert!(!engine.has_container(&id));
    assert!(!engine.has_network(&net));
}

#[tokio::test]
async fn session_cleanup_leaves_other_sessions_alone() {
    let engine = MemoryEngine::new();
    let mine = engine.add_container("a", labels("s1"), true);
    let theirs = engine.add_container("b", labels("s2"), true);
    let my_net = engine.add_network("n1", labels("s1"));
    let their_net = engine.add_network("n2", labels("s2"));
    let unlabeled = engine.add_container("c", HashMap::new(), true);

    let report = cleaner(&engine)
        .clean(&LabelFilter::session(&SessionId::new("s1")))
        .await;

    assert!(report.is_clean());
    assert!(!engine.has_container(&mine));
    assert!(!engine.has_network(&my_net));
    assert!(engine.is_running(&theirs));
    assert!(engine.has_network(&their_net));
    assert!(engine.is_running(&unlabeled));
}

#[tokio::test]
async fn domain_sweep_spares_unlabeled_resources() {
    let engine = MemoryEngine::new();
    let _a = engine.add_container("a", labels("s1"), false);
    let _b = engine.add_container("b", labels("s2"), true);
    let foreign = engine.add_container("c", HashMap::new(), true);
    let foreign_net = engine.add_network("bridge", HashMap::new());

    let report = cleaner(&engine).clean(&LabelFilter::domain()).await;

    assert_eq!(report.remove.matched, 2);
    assert_eq!(engine.container_ids(), vec![foreign]);
    assert_eq!(engine.network_ids(), vec![foreign_net]);
}

#[tokio::test]
async fn empty_cleanup_is_a_clean_noop() {
    let engine = MemoryEngine::new();
    let report = cleaner(&engine).clean(&LabelFilter::domain()).await;
    assert!(report.is_clean());
    assert_eq!(report.stop.matched + report.remove.matched + report.networks.matched, 0);
}
