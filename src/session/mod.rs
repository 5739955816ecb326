// Composition root: wires poll loop, event channel, alerts and orchestrator
// around one shared state view

use crate::alerts::{AlertEntry, AlertManager};
use crate::channel::{subject_topics, ChannelError, ChannelEvent, EventChannel, EventHandler, Transport};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::notifier::Notifier;
use crate::orchestrator::{Orchestrator, PredictionService};
use crate::poll::{AppLifecycle, LifecycleAction, PollController, SensorSource};
use crate::prediction::{PredictionEvent, Recommendation, Schedule, ScheduleInput};
use crate::reading::SensorReading;
use crate::state::{PollState, SessionUpdate, StateSnapshot, StateStore};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capabilities the session consumes
pub struct SessionDeps {
    pub sensor_source: Arc<dyn SensorSource>,
    pub prediction_service: Arc<dyn PredictionService>,
    pub transport: Arc<dyn Transport>,
    pub notifier: Option<Arc<dyn Notifier>>,
}

/// Session snapshot served to consumers
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub state: StateSnapshot,
    pub alerts: Vec<Arc<AlertEntry>>,
    #[serde(rename = "channelConnected")]
    pub channel_connected: bool,
    pub topics: Vec<String>,
    pub polling: bool,
    pub lifecycle: AppLifecycle,
}

/// SyncSession owns every task of one client session.
///
/// Created with [`SyncSession::new`] inside a tokio runtime and torn down
/// with [`SyncSession::dispose`], which stops polling, drops all
/// subscriptions and cancels pending alert expiries.
pub struct SyncSession {
    store: Arc<StateStore>,
    alerts: Arc<AlertManager>,
    channel: EventChannel,
    poll: PollController,
    orchestrator: Arc<Orchestrator>,
    /// Auto-predict queue shared by polled and pushed readings
    changed_tx: Option<mpsc::Sender<Arc<SensorReading>>>,
    poll_interval: Mutex<Duration>,
    /// Serializes subject changes and resubscription
    binding: tokio::sync::Mutex<()>,
    auto_predict: Mutex<Option<JoinHandle<()>>>,
    /// Recommendation fetch for the bound subject
    seeding: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl SyncSession {
    pub fn new(config: &SyncConfig, deps: SessionDeps) -> Self {
        let store = Arc::new(StateStore::new(
            config.poll.stale_threshold(),
            config.history.capacity,
            config.recommendations.capacity,
        ));

        let alert_notifier = deps
            .notifier
            .clone()
            .filter(|_| config.session.enable_alerts);
        let alerts = Arc::new(AlertManager::new(
            config.alerts.capacity,
            config.alerts.ttl(),
            alert_notifier,
            store.sender(),
        ));

        let channel = EventChannel::new(deps.transport, config.channel.namespace.clone());
        let orchestrator = Arc::new(
            Orchestrator::new(Arc::clone(&store), deps.prediction_service)
                .with_notifier(deps.notifier),
        );

        let mut poll = PollController::new(
            Arc::clone(&store),
            deps.sensor_source,
            config.poll.readings_per_fetch,
        );
        let mut auto_predict = None;
        let mut changed_tx = None;
        if config.session.auto_predict {
            let (tx, rx) = mpsc::channel(4);
            poll = poll.with_change_sink(tx.clone());
            changed_tx = Some(tx);
            auto_predict = Some(spawn_auto_predict(Arc::clone(&orchestrator), rx));
        }

        let mut seeding = None;
        if let Some(subject_id) = config.session.subject_id.clone().filter(|s| !s.is_empty()) {
            store.bind_subject(Some(subject_id.clone()));
            seeding = Some(spawn_seed_recommendations(Arc::clone(&orchestrator), subject_id));
        }

        Self {
            store,
            alerts,
            channel,
            poll,
            orchestrator,
            changed_tx,
            poll_interval: Mutex::new(config.poll.interval()),
            binding: tokio::sync::Mutex::new(()),
            auto_predict: Mutex::new(auto_predict),
            seeding: Mutex::new(seeding),
            disposed: AtomicBool::new(false),
        }
    }

    fn event_handler(&self) -> EventHandler {
        let router = EventRouter {
            store: Arc::clone(&self.store),
            alerts: Arc::clone(&self.alerts),
            changed_tx: self.changed_tx.clone(),
        };
        Arc::new(move |event| router.route(event))
    }

    /// Replace the recommendation fetch with one for `subject_id` (or none)
    fn reseed(&self, subject_id: Option<&str>) {
        let task = subject_id
            .map(|id| spawn_seed_recommendations(Arc::clone(&self.orchestrator), id.to_string()));
        let previous = std::mem::replace(
            &mut *self.seeding.lock().unwrap_or_else(PoisonError::into_inner),
            task,
        );
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn interval(&self) -> Duration {
        *self.poll_interval.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Event channel

    /// Connect the transport and subscribe the bound subject's topics
    pub async fn connect_channel(&self) -> Result<usize, SyncError> {
        if let Err(e) = self.channel.connect().await {
            let message = format!("{:#}", e);
            warn!(error = %message, "Event channel connection failed");
            self.store.set_error(message.clone());
            return Err(SyncError::Transport(message));
        }
        self.resubscribe().await
    }

    /// Subscribe any topic of the bound subject that is not currently subscribed.
    ///
    /// Returns how many topics were added.
    pub async fn resubscribe(&self) -> Result<usize, SyncError> {
        let _binding = self.binding.lock().await;
        let Some(subject_id) = self.store.subject_id() else {
            return Ok(0);
        };

        let handler = self.event_handler();
        let mut added = 0;
        for topic in subject_topics(self.channel.namespace(), &subject_id) {
            if self.channel.is_subscribed(&topic) {
                continue;
            }
            match self.channel.subscribe(&topic, Arc::clone(&handler)).await {
                Ok(()) => added += 1,
                Err(ChannelError::AlreadySubscribed { .. }) => {}
                Err(e) => {
                    self.store.set_error(e.to_string());
                    return Err(e.into());
                }
            }
        }
        if added > 0 {
            info!(subject_id = %subject_id, topics = added, "Subscriptions established");
        }
        Ok(added)
    }

    pub fn channel_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn active_topics(&self) -> Vec<String> {
        self.channel.active_topics()
    }

    // Subject binding

    /// Bind the session to another subject (or none).
    ///
    /// Polling, subscriptions and alerts of the old subject are torn down
    /// before the new subject's state becomes visible; polling restarts for
    /// the new subject if it was running. A failed subscription is recorded
    /// as the last error and returned, the binding itself still stands.
    pub async fn set_subject(&self, subject_id: Option<String>) -> Result<(), SyncError> {
        let _binding = self.binding.lock().await;
        let subject_id = subject_id.filter(|s| !s.is_empty());
        let previous = self.store.subject_id();
        if previous == subject_id {
            return Ok(());
        }

        let was_polling = self.poll.current().is_some();
        self.poll.stop();
        // Rebind before clearing so late alerts for the old subject are dropped
        self.store.bind_subject(subject_id.clone());
        self.alerts.clear_all();
        info!(from = ?previous, to = ?subject_id, "Subject changed");

        if was_polling {
            self.poll.start(subject_id.as_deref(), self.interval());
        }
        self.reseed(subject_id.as_deref());

        if let Err(e) = self
            .channel
            .switch_subject(previous.as_deref(), subject_id.as_deref(), self.event_handler())
            .await
        {
            warn!(subject_id = ?subject_id, error = %e, "Failed to subscribe subject topics");
            self.store.set_error(e.to_string());
            return Err(e.into());
        }
        Ok(())
    }

    pub fn subject_id(&self) -> Option<String> {
        self.store.subject_id()
    }

    // Polling

    /// Poll the bound subject at the configured interval
    pub fn start_polling(&self) -> bool {
        self.poll.start(self.store.subject_id().as_deref(), self.interval())
    }

    pub fn start_polling_every(&self, interval: Duration) -> bool {
        *self.poll_interval.lock().unwrap_or_else(PoisonError::into_inner) = interval;
        self.start_polling()
    }

    pub fn stop_polling(&self) -> bool {
        self.poll.stop()
    }

    /// Change the interval; a running or paused loop is restarted with it
    pub fn set_poll_interval(&self, interval: Duration) -> bool {
        *self.poll_interval.lock().unwrap_or_else(PoisonError::into_inner) = interval;
        match self.poll.current() {
            Some((subject_id, current)) if current != interval => {
                self.poll.start(Some(&subject_id), interval)
            }
            _ => false,
        }
    }

    pub fn on_lifecycle_change(&self, next: AppLifecycle) -> LifecycleAction {
        self.poll.on_lifecycle_change(next)
    }

    pub fn is_polling(&self) -> bool {
        self.poll.is_active()
    }

    pub fn poll_state(&self) -> PollState {
        self.store.poll_state()
    }

    // Requests

    /// On-demand prediction, from `reading` or else the current reading
    pub async fn request_prediction(
        &self,
        reading: Option<SensorReading>,
    ) -> Result<Arc<PredictionEvent>, SyncError> {
        let reading = reading.map(Arc::new).or_else(|| self.store.current_reading());
        let subject_id = self.store.subject_id();
        self.orchestrator
            .request_prediction(subject_id.as_deref(), reading.as_deref())
            .await
    }

    pub async fn create_schedule(&self, input: &ScheduleInput) -> Result<Arc<Schedule>, SyncError> {
        let subject_id = self.store.subject_id();
        self.orchestrator
            .create_schedule(subject_id.as_deref(), input)
            .await
    }

    // Alerts and errors

    pub fn active_alerts(&self) -> Vec<Arc<AlertEntry>> {
        self.alerts.active()
    }

    pub fn clear_alerts(&self) -> usize {
        self.alerts.clear_all()
    }

    /// Alerts are left untouched
    pub fn clear_error(&self) -> bool {
        self.store.clear_error()
    }

    pub fn last_error(&self) -> Option<String> {
        self.store.last_error()
    }

    // Views

    pub fn current_reading(&self) -> Option<Arc<SensorReading>> {
        self.store.current_reading()
    }

    pub fn current_prediction(&self) -> Option<Arc<PredictionEvent>> {
        self.store.current_prediction()
    }

    pub fn current_schedule(&self) -> Option<Arc<Schedule>> {
        self.store.current_schedule()
    }

    pub fn recommendations(&self) -> Vec<Arc<Recommendation>> {
        self.store.recommendations()
    }

    pub fn is_stale(&self) -> bool {
        self.store.is_stale()
    }

    pub fn is_loading(&self) -> bool {
        self.store.is_loading()
    }

    pub fn history_snapshot(&self) -> Vec<Arc<PredictionEvent>> {
        self.store.history_snapshot()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.store.snapshot(),
            alerts: self.alerts.active(),
            channel_connected: self.channel.is_connected(),
            topics: self.channel.active_topics(),
            polling: self.poll.is_active(),
            lifecycle: self.poll.lifecycle(),
        }
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<SessionUpdate> {
        self.store.subscribe()
    }

    // Teardown

    /// Stop every task owned by the session; safe to call more than once
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.poll.stop();
        let topics = self.channel.unsubscribe_all().await;
        let alerts = self.alerts.clear_all();
        self.abort_tasks();
        info!(topics, alerts, "Session disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn abort_tasks(&self) {
        for slot in [&self.auto_predict, &self.seeding] {
            if let Some(task) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                task.abort();
            }
        }
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Routes pushed events into the state view, dropping events for other subjects
struct EventRouter {
    store: Arc<StateStore>,
    alerts: Arc<AlertManager>,
    changed_tx: Option<mpsc::Sender<Arc<SensorReading>>>,
}

impl EventRouter {
    fn route(&self, event: ChannelEvent) {
        if self.store.subject_id().as_deref() != Some(event.subject_id()) {
            debug!(subject_id = %event.subject_id(), kind = %event.kind(), "Ignoring event for unbound subject");
            return;
        }
        match event {
            ChannelEvent::Prediction(prediction) => {
                self.store.apply_pushed_prediction(prediction);
            }
            ChannelEvent::Recommendation(recommendation) => {
                self.store.push_recommendation(recommendation);
            }
            ChannelEvent::Alert { input, .. } => {
                self.alerts.raise(input);
            }
            ChannelEvent::Reading(reading) => {
                let Some(changed) = self.store.apply_pushed_reading(reading) else {
                    return;
                };
                if let Some(tx) = &self.changed_tx {
                    if let Err(e) = tx.try_send(changed) {
                        debug!(error = %e, "Auto-predict queue busy; pushed reading not forwarded");
                    }
                }
            }
        }
    }
}

fn spawn_seed_recommendations(orchestrator: Arc<Orchestrator>, subject_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        orchestrator.load_recommendations(&subject_id).await;
    })
}

/// Request a prediction for each changed reading the poll loop forwards
fn spawn_auto_predict(
    orchestrator: Arc<Orchestrator>,
    mut rx: mpsc::Receiver<Arc<SensorReading>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(reading) = rx.recv().await {
            let subject_id = reading.subject_id.clone();
            match orchestrator
                .request_prediction(Some(&subject_id), Some(&reading))
                .await
            {
                Ok(_) => debug!(subject_id = %subject_id, "Auto prediction applied"),
                Err(e) => debug!(subject_id = %subject_id, error = %e, "Auto prediction not applied"),
            }
        }
    })
}
