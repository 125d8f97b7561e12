//! Degraded feeds and ledger persistence as seen through the controller.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use posefocus_lib::{
    config::EngineConfig,
    ledger::{JsonFileStore, LedgerStore, MemoryStore},
    models::{ClassSelector, ClassificationSample, Frame, ScoreRecord, StopReason},
    sensing::{ClassificationFeed, ReplayFeed},
    session::{EngineEvent, SessionController},
    EngineError,
};

fn frame(unfocused: f32) -> Option<Frame> {
    Some(vec![
        ClassificationSample::new("focused", 1.0 - unfocused),
        ClassificationSample::new("unfocused", unfocused),
    ])
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// A camera that never comes up.
#[derive(Default)]
struct DeadCamera {
    classify_calls: AtomicUsize,
}

#[async_trait]
impl ClassificationFeed for DeadCamera {
    async fn start(&self) -> Result<(), EngineError> {
        Err(EngineError::FeedUnavailable("no camera attached".into()))
    }

    async fn stop(&self) {}

    async fn classify(&self) -> Result<Option<Frame>, EngineError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        Ok(frame(0.9))
    }
}

/// Slow inference that records how many calls overlap.
#[derive(Default)]
struct SlowModel {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl ClassificationFeed for SlowModel {
    async fn start(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn stop(&self) {}

    async fn classify(&self) -> Result<Option<Frame>, EngineError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(frame(0.9))
    }
}

#[tokio::test(start_paused = true)]
async fn camera_failure_keeps_session_running_as_focused() {
    let feed = Arc::new(DeadCamera::default());
    let engine = SessionController::new(
        EngineConfig::default(),
        feed.clone(),
        Arc::new(MemoryStore::new()),
    )
    .await;
    let mut events = engine.events();

    assert!(engine.start().await);
    sleep_ms(5_500).await;

    let snapshot = engine.snapshot().await;
    assert!(snapshot.active);
    assert!(snapshot.feed_error);
    assert_eq!(snapshot.elapsed_seconds, 5);
    assert_eq!(snapshot.unfocused_seconds, 0);
    assert!(!snapshot.warning);
    assert_eq!(feed.classify_calls.load(Ordering::SeqCst), 0);

    let mut feed_failures = 0;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::FeedFailed(err) = event {
            assert!(err.is_feed_error());
            feed_failures += 1;
        }
    }
    assert_eq!(feed_failures, 1);

    let summary = engine.stop(StopReason::Manual).await.unwrap();
    assert_eq!(summary.record.duration_seconds, 5);
}

#[tokio::test(start_paused = true)]
async fn at_most_one_classification_in_flight() {
    let feed = Arc::new(SlowModel::default());
    let engine = SessionController::new(
        EngineConfig::default(),
        feed.clone(),
        Arc::new(MemoryStore::new()),
    )
    .await;

    engine.start().await;
    sleep_ms(10_500).await;
    engine.stop(StopReason::Manual).await;

    assert_eq!(feed.max_in_flight.load(Ordering::SeqCst), 1);
    // One call every two seconds, not one per 100ms frame slot.
    let calls = feed.calls.load(Ordering::SeqCst);
    assert!((5..=6).contains(&calls), "calls = {calls}");
}

#[tokio::test(start_paused = true)]
async fn late_result_after_stop_is_discarded() {
    let feed = Arc::new(ReplayFeed::from_frames(vec![frame(0.99)]).with_latency(Duration::from_secs(3)));
    let engine =
        SessionController::new(EngineConfig::default(), feed.clone(), Arc::new(MemoryStore::new())).await;

    engine.start().await;
    sleep_ms(1_200).await;
    let summary = engine.stop(StopReason::Manual).await.unwrap();
    assert_eq!(summary.record.duration_seconds, 1);
    assert!(!feed.is_running());

    // The first session's frame would have resolved at t = 3s.
    engine.start().await;
    sleep_ms(2_500).await;
    let snapshot = engine.snapshot().await;
    assert!(snapshot.active);
    assert_eq!(snapshot.elapsed_seconds, 2);
    assert_eq!(snapshot.unfocused_seconds, 0);
    assert!(snapshot.last_frame.is_none());
    assert_eq!(engine.ledger().await.len(), 1);

    engine.stop(StopReason::Manual).await;
}

#[tokio::test(start_paused = true)]
async fn classification_timeout_raises_feed_error() {
    let feed = Arc::new(ReplayFeed::from_frames(vec![frame(0.99)]).with_latency(Duration::from_secs(60)));
    let engine =
        SessionController::new(EngineConfig::default(), feed, Arc::new(MemoryStore::new())).await;

    engine.start().await;
    sleep_ms(4_500).await;
    assert!(!engine.snapshot().await.feed_error);

    sleep_ms(1_000).await;
    let snapshot = engine.snapshot().await;
    assert!(snapshot.feed_error);
    assert!(snapshot.active);
    assert_eq!(snapshot.unfocused_seconds, 0);

    engine.stop(StopReason::Manual).await;
}

#[tokio::test(start_paused = true)]
async fn missing_unfocused_class_is_a_feed_error() {
    let config = EngineConfig {
        unfocused_class: ClassSelector::Label("distracted".into()),
        ..EngineConfig::default()
    };
    let feed = Arc::new(ReplayFeed::from_frames(vec![frame(0.99)]));
    let engine = SessionController::new(config, feed, Arc::new(MemoryStore::new())).await;
    let mut events = engine.events();

    engine.start().await;
    sleep_ms(1_000).await;

    let mut failures = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::FeedFailed(err) = event {
            failures.push(err);
        }
    }
    assert_eq!(
        failures,
        vec![EngineError::ClassificationMissingClass("distracted".into())]
    );

    sleep_ms(24_000).await;

    let snapshot = engine.snapshot().await;
    assert!(snapshot.active);
    assert!(snapshot.feed_error);
    assert!(!snapshot.warning);
    assert_eq!(snapshot.unfocused_seconds, 0);

    engine.stop(StopReason::Manual).await;
}

#[tokio::test(start_paused = true)]
async fn persistence_failure_is_a_warning() {
    let store = MemoryStore::new();
    store.fail_saves(true);
    let feed = Arc::new(ReplayFeed::from_frames(vec![frame(0.1)]));
    let engine =
        SessionController::new(EngineConfig::default(), feed, Arc::new(store.clone())).await;

    engine.start().await;
    sleep_ms(4_500).await;
    let summary = engine.stop(StopReason::Manual).await.unwrap();

    assert!(matches!(
        summary.persistence_warning,
        Some(EngineError::LedgerPersistence(_))
    ));
    assert_eq!(engine.ledger().await, vec![summary.record.clone()]);
    assert!(engine.snapshot().await.persistence_error.is_some());
    assert!(store.stored().await.is_empty());

    // The next successful save catches the store up with memory.
    store.fail_saves(false);
    engine.start().await;
    sleep_ms(2_500).await;
    let summary = engine.stop(StopReason::Manual).await.unwrap();
    assert!(summary.persistence_warning.is_none());
    assert!(engine.snapshot().await.persistence_error.is_none());

    let stored: Vec<u64> = store.stored().await.iter().map(|r| r.duration_seconds).collect();
    assert_eq!(stored, vec![4, 2]);
}

#[tokio::test(start_paused = true)]
async fn loaded_ledger_is_ranked() {
    let now = Utc::now();
    let store = MemoryStore::with_records(vec![
        ScoreRecord::new(10, now),
        ScoreRecord::new(45, now),
        ScoreRecord::new(30, now),
    ]);
    let feed = Arc::new(ReplayFeed::from_frames(vec![frame(0.1)]));
    let engine = SessionController::new(EngineConfig::default(), feed, Arc::new(store)).await;

    let durations: Vec<u64> = engine.ledger().await.iter().map(|r| r.duration_seconds).collect();
    assert_eq!(durations, vec![45, 30, 10]);
}

#[tokio::test(start_paused = true)]
async fn ledger_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("focus_scores.json");

    {
        let feed = Arc::new(ReplayFeed::from_frames(vec![frame(0.1)]));
        let store = Arc::new(JsonFileStore::new(path.clone()));
        let engine = SessionController::new(EngineConfig::default(), feed, store).await;
        engine.start().await;
        sleep_ms(7_500).await;
        engine.stop(StopReason::Manual).await.unwrap();
    }

    let store = JsonFileStore::new(path);
    let reloaded = store.load_ledger().await.unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded[0].duration_seconds, 7);

    let feed = Arc::new(ReplayFeed::from_frames(vec![frame(0.1)]));
    let engine = SessionController::new(EngineConfig::default(), feed, Arc::new(store)).await;
    assert_eq!(engine.ledger().await, reloaded);
}

#[tokio::test(start_paused = true)]
async fn unreadable_ledger_starts_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("focus_scores.json");
    std::fs::write(&path, "not json").unwrap();

    let feed = Arc::new(ReplayFeed::from_frames(vec![frame(0.1)]));
    let engine =
        SessionController::new(EngineConfig::default(), feed, Arc::new(JsonFileStore::new(path))).await;

    let snapshot = engine.snapshot().await;
    assert!(snapshot.ledger.is_empty());
    assert!(snapshot.persistence_error.is_some());

    assert!(engine.start().await);
    sleep_ms(2_500).await;
    let summary = engine.stop(StopReason::Manual).await.unwrap();
    assert!(summary.persistence_warning.is_none());

    // The new ledger is written, and the unreadable one survives beside it.
    let backups: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("focus_scores.json.corrupt-"))
        })
        .collect();
    assert_eq!(backups.len(), 1);
    assert_eq!(std::fs::read_to_string(&backups[0]).unwrap(), "not json");

    let reloaded = JsonFileStore::new(dir.path().join("focus_scores.json"))
        .load_ledger()
        .await
        .unwrap();
    assert_eq!(reloaded, vec![summary.record]);
}
