use super::*;
use crate::reading::SensorReading;
use crate::state::StateStore;
use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const INTERVAL: Duration = Duration::from_millis(5_000);

#[derive(Clone, Copy)]
enum Reply {
    Moisture(f64),
    Empty,
    Fail,
}

struct ScriptedSource {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSource {
    fn new(fallback: Reply) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn then(self, reply: Reply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SensorSource for ScriptedSource {
    async fn fetch(&self, subject_id: &str, _count: usize) -> anyhow::Result<Vec<SensorReading>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self.replies.lock().unwrap().pop_front().unwrap_or(self.fallback);
        match reply {
            Reply::Moisture(value) => {
                let mut metrics = BTreeMap::new();
                metrics.insert("moisture".to_string(), value);
                Ok(vec![SensorReading::new(subject_id, metrics, Utc::now())])
            }
            Reply::Empty => Ok(Vec::new()),
            Reply::Fail => anyhow::bail!("sensor service unavailable"),
        }
    }
}

fn setup(source: ScriptedSource) -> (Arc<StateStore>, Arc<ScriptedSource>, PollController) {
    let store = Arc::new(StateStore::new(Duration::from_millis(10_000), 20, 10));
    store.bind_subject(Some("plant-1".to_string()));
    let source = Arc::new(source);
    let controller = PollController::new(store.clone(), source.clone(), 1);
    (store, source, controller)
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_start_fetches_immediately_then_every_interval() {
    let (store, source, controller) = setup(ScriptedSource::new(Reply::Moisture(40.0)));

    assert!(controller.start(Some("plant-1"), INTERVAL));
    advance(1).await;
    assert_eq!(source.calls(), 1);
    assert_eq!(store.current_reading().unwrap().moisture(), Some(40.0));

    advance(5_000).await;
    assert_eq!(source.calls(), 2);
    advance(10_000).await;
    assert_eq!(source.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_missing_subject_or_zero_interval_is_noop() {
    let (_store, source, controller) = setup(ScriptedSource::new(Reply::Moisture(40.0)));

    assert!(!controller.start(None, INTERVAL));
    assert!(!controller.start(Some(""), INTERVAL));
    assert!(!controller.start(Some("plant-1"), Duration::ZERO));
    advance(6_000).await;

    assert_eq!(source.calls(), 0);
    assert!(!controller.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_keeps_single_loop() {
    let (_store, source, controller) = setup(ScriptedSource::new(Reply::Moisture(40.0)));

    assert!(controller.start(Some("plant-1"), INTERVAL));
    assert!(!controller.start(Some("plant-1"), INTERVAL));
    advance(5_001).await;

    assert_eq!(source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_new_interval_replaces_loop() {
    let (_store, source, controller) = setup(ScriptedSource::new(Reply::Moisture(40.0)));

    controller.start(Some("plant-1"), INTERVAL);
    advance(1).await;
    assert!(controller.start(Some("plant-1"), Duration::from_millis(1_000)));
    advance(2_500).await;

    // 1 from the first loop, then 3 from the 1s loop (t=1, 1001, 2001 ms)
    assert_eq!(source.calls(), 4);
    assert_eq!(
        controller.current(),
        Some(("plant-1".to_string(), Duration::from_millis(1_000)))
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_and_halts_fetches() {
    let (store, source, controller) = setup(ScriptedSource::new(Reply::Moisture(40.0)));

    controller.start(Some("plant-1"), INTERVAL);
    advance(1).await;

    assert!(controller.stop());
    assert!(!controller.stop());
    advance(20_000).await;

    assert_eq!(source.calls(), 1);
    assert!(!store.poll_state().active);
    // Last known data is kept
    assert!(store.current_reading().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_empty_result_records_error() {
    let (store, _source, controller) = setup(ScriptedSource::new(Reply::Empty));

    controller.start(Some("plant-1"), INTERVAL);
    advance(1).await;

    assert_eq!(store.last_error().as_deref(), Some(NO_SENSOR_DATA));
    assert!(store.current_reading().is_none());
    assert!(!store.is_loading());
}

#[tokio::test(start_paused = true)]
async fn test_failures_keep_timer_running() {
    let source = ScriptedSource::new(Reply::Moisture(55.0)).then(Reply::Fail);
    let (store, source, controller) = setup(source);

    controller.start(Some("plant-1"), INTERVAL);
    advance(1).await;
    assert!(store.last_error().unwrap().contains("sensor service unavailable"));

    advance(5_000).await;
    assert_eq!(source.calls(), 2);
    assert!(store.last_error().is_none());
    assert_eq!(store.current_reading().unwrap().moisture(), Some(55.0));
}

#[tokio::test(start_paused = true)]
async fn test_slow_fetch_never_overlaps() {
    let mut source = ScriptedSource::new(Reply::Moisture(40.0));
    source.delay = Duration::from_millis(12_000);
    let (_store, source, controller) = setup(source);

    controller.start(Some("plant-1"), INTERVAL);
    advance(60_000).await;

    assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(source.calls() <= 5);
}

#[tokio::test(start_paused = true)]
async fn test_background_pauses_and_active_resumes() {
    let (store, source, controller) = setup(ScriptedSource::new(Reply::Moisture(40.0)));

    controller.start(Some("plant-1"), INTERVAL);
    advance(1).await;

    assert_eq!(controller.on_lifecycle_change(AppLifecycle::Background), LifecycleAction::Paused);
    assert_eq!(controller.on_lifecycle_change(AppLifecycle::Background), LifecycleAction::None);
    advance(20_000).await;
    assert_eq!(source.calls(), 1);
    assert!(store.current_reading().is_some());
    assert!(controller.is_paused());

    assert_eq!(controller.on_lifecycle_change(AppLifecycle::Active), LifecycleAction::Resumed);
    advance(1).await;
    assert_eq!(source.calls(), 2);
    assert!(controller.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_inactive_alone_does_nothing() {
    let (_store, source, controller) = setup(ScriptedSource::new(Reply::Moisture(40.0)));

    controller.start(Some("plant-1"), INTERVAL);
    assert_eq!(controller.on_lifecycle_change(AppLifecycle::Inactive), LifecycleAction::None);
    assert_eq!(controller.on_lifecycle_change(AppLifecycle::Active), LifecycleAction::None);
    advance(5_001).await;

    assert_eq!(source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_start_while_backgrounded_defers_until_active() {
    let (_store, source, controller) = setup(ScriptedSource::new(Reply::Moisture(40.0)));

    controller.on_lifecycle_change(AppLifecycle::Background);
    assert!(controller.start(Some("plant-1"), INTERVAL));
    advance(10_000).await;
    assert_eq!(source.calls(), 0);
    assert!(controller.is_paused());

    controller.on_lifecycle_change(AppLifecycle::Active);
    advance(1).await;
    assert_eq!(source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_resume() {
    let (_store, source, controller) = setup(ScriptedSource::new(Reply::Moisture(40.0)));

    controller.start(Some("plant-1"), INTERVAL);
    advance(1).await;
    controller.on_lifecycle_change(AppLifecycle::Background);
    assert!(controller.stop());

    assert_eq!(controller.on_lifecycle_change(AppLifecycle::Active), LifecycleAction::None);
    advance(10_000).await;
    assert_eq!(source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_changed_readings_are_forwarded() {
    let source = ScriptedSource::new(Reply::Moisture(40.0))
        .then(Reply::Moisture(30.0))
        .then(Reply::Moisture(30.0));
    let store = Arc::new(StateStore::new(Duration::from_millis(10_000), 20, 10));
    store.bind_subject(Some("plant-1".to_string()));
    let (tx, mut rx) = mpsc::channel(8);
    let controller = PollController::new(store, Arc::new(source), 1).with_change_sink(tx);

    controller.start(Some("plant-1"), INTERVAL);
    advance(15_001).await;

    // 30, 30, 40, 40: only the value changes are forwarded
    assert_eq!(rx.try_recv().unwrap().moisture(), Some(30.0));
    assert_eq!(rx.try_recv().unwrap().moisture(), Some(40.0));
    assert!(rx.try_recv().is_err());
}
