use super::{AppLifecycle, LifecycleAction, SensorSource};
use crate::reading::SensorReading;
use crate::state::StateStore;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const NO_SENSOR_DATA: &str = "no sensor data available";

struct RunningLoop {
    subject_id: String,
    interval: Duration,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct ControllerState {
    running: Option<RunningLoop>,
    /// Loop suspended by backgrounding, resumed on the next return to Active
    paused: Option<(String, Duration)>,
    lifecycle: AppLifecycle,
}

/// PollController keeps at most one fetch loop alive.
///
/// The loop is a single task that awaits each fetch inline, so cycles never
/// overlap; ticks that elapse during a slow fetch are skipped. Every loop
/// gets a fresh generation from the state store, and writes carrying an
/// older generation are dropped there.
pub struct PollController {
    store: Arc<StateStore>,
    source: Arc<dyn SensorSource>,
    readings_per_fetch: usize,
    changed_tx: Option<mpsc::Sender<Arc<SensorReading>>>,
    inner: Mutex<ControllerState>,
}

impl PollController {
    pub fn new(
        store: Arc<StateStore>,
        source: Arc<dyn SensorSource>,
        readings_per_fetch: usize,
    ) -> Self {
        Self {
            store,
            source,
            readings_per_fetch: readings_per_fetch.max(1),
            changed_tx: None,
            inner: Mutex::new(ControllerState::default()),
        }
    }

    /// Forward readings whose values changed to `tx`
    pub fn with_change_sink(mut self, tx: mpsc::Sender<Arc<SensorReading>>) -> Self {
        self.changed_tx = Some(tx);
        self
    }

    fn inner(&self) -> MutexGuard<'_, ControllerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start polling `subject_id` every `interval`, fetching immediately.
    ///
    /// Returns false (and does nothing) for a missing subject, a zero
    /// interval, or when the same loop is already running. A loop for
    /// another subject or interval is stopped first.
    pub fn start(&self, subject_id: Option<&str>, interval: Duration) -> bool {
        let Some(subject_id) = subject_id.filter(|s| !s.is_empty()) else {
            debug!("Not polling: no subject bound");
            return false;
        };
        if interval.is_zero() {
            debug!(subject_id = %subject_id, "Not polling: zero interval");
            return false;
        }

        let mut inner = self.inner();
        let same = |s: &str, i: Duration| s == subject_id && i == interval;
        if inner
            .running
            .as_ref()
            .is_some_and(|r| same(&r.subject_id, r.interval))
            || inner.paused.as_ref().is_some_and(|(s, i)| same(s, *i))
        {
            return false;
        }

        if let Some(previous) = inner.running.take() {
            previous.task.abort();
            info!(subject_id = %previous.subject_id, "Stopped previous poll loop");
        }
        inner.paused = None;

        if inner.lifecycle == AppLifecycle::Background {
            inner.paused = Some((subject_id.to_string(), interval));
            self.store.end_poll();
            info!(subject_id = %subject_id, "App in background; poll loop deferred");
            return true;
        }

        inner.running = Some(self.spawn_loop(subject_id, interval));
        true
    }

    /// Stop the loop (and any pending resume). Returns false when nothing was running.
    pub fn stop(&self) -> bool {
        let mut inner = self.inner();
        let was_paused = inner.paused.take().is_some();
        let Some(running) = inner.running.take() else {
            return was_paused;
        };
        running.task.abort();
        self.store.end_poll();
        info!(subject_id = %running.subject_id, "Poll loop stopped");
        true
    }

    /// React to an app lifecycle transition.
    ///
    /// Entering Background pauses a running loop; returning to Active
    /// resumes a loop paused that way. Repeated reports of the same state do
    /// nothing, and Inactive alone never pauses.
    pub fn on_lifecycle_change(&self, next: AppLifecycle) -> LifecycleAction {
        let mut inner = self.inner();
        let previous = std::mem::replace(&mut inner.lifecycle, next);

        match next {
            AppLifecycle::Background if previous != AppLifecycle::Background => {
                let Some(running) = inner.running.take() else {
                    return LifecycleAction::None;
                };
                running.task.abort();
                self.store.end_poll();
                info!(subject_id = %running.subject_id, "App backgrounded; poll loop paused");
                inner.paused = Some((running.subject_id, running.interval));
                LifecycleAction::Paused
            }
            AppLifecycle::Active if previous != AppLifecycle::Active => {
                let Some((subject_id, interval)) = inner.paused.take() else {
                    return LifecycleAction::None;
                };
                info!(subject_id = %subject_id, "App active; poll loop resumed");
                inner.running = Some(self.spawn_loop(&subject_id, interval));
                LifecycleAction::Resumed
            }
            _ => LifecycleAction::None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner().running.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.inner().paused.is_some()
    }

    pub fn lifecycle(&self) -> AppLifecycle {
        self.inner().lifecycle
    }

    /// Subject and interval of the running or paused loop
    pub fn current(&self) -> Option<(String, Duration)> {
        let inner = self.inner();
        inner
            .running
            .as_ref()
            .map(|r| (r.subject_id.clone(), r.interval))
            .or_else(|| inner.paused.clone())
    }

    fn spawn_loop(&self, subject_id: &str, interval: Duration) -> RunningLoop {
        let generation = self.store.begin_poll(subject_id);
        info!(
            subject_id = %subject_id,
            interval_ms = interval.as_millis() as u64,
            "Poll loop started"
        );

        let cycle = PollCycle {
            store: Arc::clone(&self.store),
            source: Arc::clone(&self.source),
            subject_id: subject_id.to_string(),
            generation,
            count: self.readings_per_fetch,
            changed_tx: self.changed_tx.clone(),
        };

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                // First tick completes immediately
                ticker.tick().await;
                if !cycle.run().await {
                    break;
                }
            }
        });

        RunningLoop {
            subject_id: subject_id.to_string(),
            interval,
            task,
        }
    }
}

impl Drop for PollController {
    fn drop(&mut self) {
        if let Some(running) = self.inner().running.take() {
            running.task.abort();
        }
    }
}

/// Everything one loop needs to run a fetch cycle
struct PollCycle {
    store: Arc<StateStore>,
    source: Arc<dyn SensorSource>,
    subject_id: String,
    generation: u64,
    count: usize,
    changed_tx: Option<mpsc::Sender<Arc<SensorReading>>>,
}

impl PollCycle {
    /// One fetch. Returns false once the loop has been superseded.
    async fn run(&self) -> bool {
        if !self.store.poll_cycle_started(self.generation) {
            return false;
        }

        match self.source.fetch(&self.subject_id, self.count).await {
            Ok(readings) => {
                let newest = readings.into_iter().max_by_key(|r| r.captured_at);
                match newest {
                    Some(reading) => {
                        if let Some(changed) = self.store.poll_succeeded(self.generation, reading) {
                            self.forward(changed);
                        }
                    }
                    None => self
                        .store
                        .poll_failed(self.generation, NO_SENSOR_DATA.to_string()),
                }
            }
            Err(e) => {
                warn!(subject_id = %self.subject_id, error = %e, "Sensor fetch failed");
                self.store.poll_failed(self.generation, format!("{:#}", e));
            }
        }
        true
    }

    fn forward(&self, reading: Arc<SensorReading>) {
        let Some(tx) = &self.changed_tx else {
            return;
        };
        if let Err(e) = tx.try_send(reading) {
            debug!(subject_id = %self.subject_id, error = %e, "Auto-predict queue busy; reading not forwarded");
        }
    }
}
