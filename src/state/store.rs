use crate::freshness::{self, Freshness};
use crate::history::HistoryBuffer;
use crate::prediction::{PredictionEvent, Recommendation, Schedule};
use crate::reading::SensorReading;
use crate::state::update::SessionUpdate;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

/// Per-subject poll status
#[derive(Clone, Debug, Default, Serialize)]
pub struct PollState {
    #[serde(rename = "subjectId")]
    pub subject_id: Option<String>,

    pub active: bool,

    pub loading: bool,

    /// Last successful fetch (tokio clock, drives staleness)
    #[serde(skip)]
    pub last_success: Option<Instant>,

    #[serde(rename = "lastSuccessAt")]
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Request/response state machine for predictions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionPhase {
    #[default]
    Idle,
    Loading,
    HasPrediction,
    HasError,
}

/// How a stamped response was handled
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    Applied(T),
    Failed(String),
    Superseded,
}

/// Issue-order stamps for overlapping requests.
///
/// A response is applied only if its stamp is newer than everything applied
/// so far; only the most recently issued request drives the loading flag.
#[derive(Debug, Default)]
struct RequestSequence {
    issued: u64,
    applied: u64,
    pending: bool,
}

impl RequestSequence {
    fn issue(&mut self) -> u64 {
        self.issued += 1;
        self.pending = true;
        self.issued
    }

    fn is_latest(&self, seq: u64) -> bool {
        seq == self.issued
    }

    fn accepts(&self, seq: u64) -> bool {
        seq > self.applied
    }

    /// Outstanding stamps can no longer be applied
    fn supersede_all(&mut self) {
        self.applied = self.issued;
        self.pending = false;
    }
}

#[derive(Debug, Default)]
struct SessionState {
    subject_id: Option<String>,
    reading: Option<Arc<SensorReading>>,
    prediction: Option<Arc<PredictionEvent>>,
    schedule: Option<Arc<Schedule>>,
    recommendations: VecDeque<Arc<Recommendation>>,
    last_error: Option<String>,
    poll: PollState,
    poll_generation: u64,
    phase: PredictionPhase,
    prediction_requests: RequestSequence,
    schedule_requests: RequestSequence,
}

/// Point-in-time copy of the current-state view
#[derive(Clone, Debug, Serialize)]
pub struct StateSnapshot {
    #[serde(rename = "subjectId")]
    pub subject_id: Option<String>,
    pub reading: Option<Arc<SensorReading>>,
    pub prediction: Option<Arc<PredictionEvent>>,
    pub schedule: Option<Arc<Schedule>>,
    pub recommendations: Vec<Arc<Recommendation>>,
    pub freshness: Freshness,
    #[serde(rename = "isStale")]
    pub is_stale: bool,
    #[serde(rename = "isLoading")]
    pub is_loading: bool,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
    pub poll: PollState,
    pub phase: PredictionPhase,
}

/// StateStore is the single current-state view shared by the pull and push paths.
///
/// Every mutation happens under one short-lived lock (never held across an
/// await), and each visible change is broadcast as a [`SessionUpdate`]. The
/// prediction history sits behind its own lock, always taken after the state lock.
pub struct StateStore {
    inner: Mutex<SessionState>,
    history: Mutex<HistoryBuffer>,
    updates_tx: broadcast::Sender<SessionUpdate>,
    stale_threshold: Duration,
    recommendation_capacity: usize,
}

impl StateStore {
    pub fn new(
        stale_threshold: Duration,
        history_capacity: usize,
        recommendation_capacity: usize,
    ) -> Self {
        let (updates_tx, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(SessionState::default()),
            history: Mutex::new(HistoryBuffer::new(history_capacity)),
            updates_tx,
            stale_threshold,
            recommendation_capacity: recommendation_capacity.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn history(&self) -> MutexGuard<'_, HistoryBuffer> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, update: SessionUpdate) {
        // No subscribers is fine
        let _ = self.updates_tx.send(update);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates_tx.subscribe()
    }

    pub(crate) fn sender(&self) -> broadcast::Sender<SessionUpdate> {
        self.updates_tx.clone()
    }

    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    // Subject binding

    pub fn subject_id(&self) -> Option<String> {
        self.state().subject_id.clone()
    }

    /// Bind the view to another subject, returning the previous one.
    ///
    /// Per-subject data is reset and every outstanding request is superseded,
    /// so nothing from the old subject can land in the new view.
    pub fn bind_subject(&self, subject_id: Option<String>) -> Option<String> {
        let previous = {
            let mut state = self.state();
            if state.subject_id == subject_id {
                return state.subject_id.clone();
            }
            let previous = state.subject_id.take();
            state.subject_id = subject_id.clone();
            state.reading = None;
            state.prediction = None;
            state.schedule = None;
            state.recommendations.clear();
            state.last_error = None;
            state.poll.last_success = None;
            state.poll.last_success_at = None;
            state.phase = PredictionPhase::Idle;
            state.prediction_requests.supersede_all();
            state.schedule_requests.supersede_all();
            self.history().reset();
            previous
        };

        debug!(from = ?previous, to = ?subject_id, "Rebound state view");
        self.emit(SessionUpdate::SubjectChanged { subject_id });
        previous
    }

    // Reads

    pub fn current_reading(&self) -> Option<Arc<SensorReading>> {
        self.state().reading.clone()
    }

    pub fn current_prediction(&self) -> Option<Arc<PredictionEvent>> {
        self.state().prediction.clone()
    }

    pub fn current_schedule(&self) -> Option<Arc<Schedule>> {
        self.state().schedule.clone()
    }

    /// Newest first
    pub fn recommendations(&self) -> Vec<Arc<Recommendation>> {
        self.state().recommendations.iter().cloned().collect()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    pub fn poll_state(&self) -> PollState {
        self.state().poll.clone()
    }

    pub fn prediction_phase(&self) -> PredictionPhase {
        self.state().phase
    }

    pub fn freshness(&self) -> Freshness {
        let last = self.state().poll.last_success;
        freshness::freshness(last, Instant::now(), self.stale_threshold)
    }

    pub fn is_stale(&self) -> bool {
        self.freshness().is_stale()
    }

    pub fn is_loading(&self) -> bool {
        let state = self.state();
        state.poll.loading || state.prediction_requests.pending || state.schedule_requests.pending
    }

    pub fn history_snapshot(&self) -> Vec<Arc<PredictionEvent>> {
        self.history().snapshot()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let state = self.state();
        let freshness =
            freshness::freshness(state.poll.last_success, Instant::now(), self.stale_threshold);
        StateSnapshot {
            subject_id: state.subject_id.clone(),
            reading: state.reading.clone(),
            prediction: state.prediction.clone(),
            schedule: state.schedule.clone(),
            recommendations: state.recommendations.iter().cloned().collect(),
            freshness,
            is_stale: freshness.is_stale(),
            is_loading: state.poll.loading
                || state.prediction_requests.pending
                || state.schedule_requests.pending,
            last_error: state.last_error.clone(),
            poll: state.poll.clone(),
            phase: state.phase,
        }
    }

    // Errors

    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.state().last_error = Some(message.clone());
        self.emit(SessionUpdate::Error {
            message: Some(message),
        });
    }

    /// Returns false when there was no error to clear
    pub fn clear_error(&self) -> bool {
        let cleared = self.state().last_error.take().is_some();
        if cleared {
            self.emit(SessionUpdate::Error { message: None });
        }
        cleared
    }

    // Pull path

    /// Mark a new poll loop active; writes from older loops are discarded afterwards
    pub(crate) fn begin_poll(&self, subject_id: &str) -> u64 {
        let generation = {
            let mut state = self.state();
            state.poll_generation += 1;
            state.poll.subject_id = Some(subject_id.to_string());
            state.poll.active = true;
            state.poll.loading = false;
            state.poll_generation
        };
        self.emit(SessionUpdate::Poll {
            active: true,
            loading: false,
        });
        generation
    }

    /// Mark polling inactive, keeping the last known data
    pub(crate) fn end_poll(&self) {
        {
            let mut state = self.state();
            state.poll_generation += 1;
            state.poll.active = false;
            state.poll.loading = false;
        }
        self.emit(SessionUpdate::Poll {
            active: false,
            loading: false,
        });
    }

    /// Start of a fetch cycle: loading on, previous error cleared
    pub(crate) fn poll_cycle_started(&self, generation: u64) -> bool {
        {
            let mut state = self.state();
            if state.poll_generation != generation {
                return false;
            }
            state.poll.loading = true;
            state.last_error = None;
        }
        self.emit(SessionUpdate::Poll {
            active: true,
            loading: true,
        });
        true
    }

    /// Apply a fetched reading.
    ///
    /// Returns the new reading when its values differ from the previous one
    /// (the trigger for reactive predictions).
    pub(crate) fn poll_succeeded(
        &self,
        generation: u64,
        reading: SensorReading,
    ) -> Option<Arc<SensorReading>> {
        let reading = Arc::new(reading);
        let changed = {
            let mut state = self.state();
            if state.poll_generation != generation
                || state.subject_id.as_deref() != Some(reading.subject_id.as_str())
            {
                debug!(subject_id = %reading.subject_id, "Discarding reading from stale poll loop");
                return None;
            }
            let changed = state
                .reading
                .as_ref()
                .map_or(true, |previous| !previous.same_values(&reading));
            state.reading = Some(Arc::clone(&reading));
            state.poll.loading = false;
            state.poll.last_success = Some(Instant::now());
            state.poll.last_success_at = Some(Utc::now());
            changed
        };

        self.emit(SessionUpdate::Reading {
            reading: Arc::clone(&reading),
        });
        self.emit(SessionUpdate::Poll {
            active: true,
            loading: false,
        });
        changed.then_some(reading)
    }

    /// Record a failed fetch; the last successful time is left untouched
    pub(crate) fn poll_failed(&self, generation: u64, message: String) {
        {
            let mut state = self.state();
            if state.poll_generation != generation {
                return;
            }
            state.poll.loading = false;
            state.last_error = Some(message.clone());
        }
        self.emit(SessionUpdate::Error {
            message: Some(message),
        });
        self.emit(SessionUpdate::Poll {
            active: true,
            loading: false,
        });
    }

    // Push path

    /// Apply a pushed prediction; bypasses the request state machine
    pub(crate) fn apply_pushed_prediction(&self, event: PredictionEvent) -> bool {
        let event = Arc::new(event);
        {
            let mut state = self.state();
            if state.subject_id.as_deref() != Some(event.subject_id.as_str()) {
                return false;
            }
            state.prediction = Some(Arc::clone(&event));
            if state.phase != PredictionPhase::Loading {
                state.phase = PredictionPhase::HasPrediction;
            }
            self.history().append(Arc::clone(&event));
        }
        self.emit(SessionUpdate::Prediction { prediction: event });
        true
    }

    /// Apply a pushed sensor reading.
    ///
    /// Counts as a successful update for staleness and clears the last
    /// error. Returns the reading when its values differ from the previous one.
    pub(crate) fn apply_pushed_reading(&self, reading: SensorReading) -> Option<Arc<SensorReading>> {
        let reading = Arc::new(reading);
        let (changed, had_error) = {
            let mut state = self.state();
            if state.subject_id.as_deref() != Some(reading.subject_id.as_str()) {
                return None;
            }
            let changed = state
                .reading
                .as_ref()
                .map_or(true, |previous| !previous.same_values(&reading));
            state.reading = Some(Arc::clone(&reading));
            state.poll.last_success = Some(Instant::now());
            state.poll.last_success_at = Some(Utc::now());
            (changed, state.last_error.take().is_some())
        };

        self.emit(SessionUpdate::Reading {
            reading: Arc::clone(&reading),
        });
        if had_error {
            self.emit(SessionUpdate::Error { message: None });
        }
        changed.then_some(reading)
    }

    pub(crate) fn push_recommendation(&self, recommendation: Recommendation) -> bool {
        let recommendation = Arc::new(recommendation);
        {
            let mut state = self.state();
            if state.subject_id.as_deref() != Some(recommendation.subject_id.as_str()) {
                return false;
            }
            state.recommendations.push_front(Arc::clone(&recommendation));
            state.recommendations.truncate(self.recommendation_capacity);
        }
        self.emit(SessionUpdate::Recommendation { recommendation });
        true
    }

    /// Append fetched recommendations behind any already received.
    ///
    /// Ignored when `subject_id` is no longer bound. Returns how many were kept.
    pub(crate) fn seed_recommendations(
        &self,
        subject_id: &str,
        recommendations: Vec<Recommendation>,
    ) -> usize {
        let added: Vec<Arc<Recommendation>> = {
            let mut state = self.state();
            if state.subject_id.as_deref() != Some(subject_id) {
                return 0;
            }
            let room = self
                .recommendation_capacity
                .saturating_sub(state.recommendations.len());
            let added: Vec<Arc<Recommendation>> = recommendations
                .into_iter()
                .filter(|r| r.subject_id == subject_id)
                .take(room)
                .map(Arc::new)
                .collect();
            state.recommendations.extend(added.iter().cloned());
            added
        };

        for recommendation in &added {
            self.emit(SessionUpdate::Recommendation {
                recommendation: Arc::clone(recommendation),
            });
        }
        added.len()
    }

    // Request path

    pub(crate) fn issue_prediction(&self) -> u64 {
        let (seq, had_error) = {
            let mut state = self.state();
            state.phase = PredictionPhase::Loading;
            let had_error = state.last_error.take().is_some();
            (state.prediction_requests.issue(), had_error)
        };
        if had_error {
            self.emit(SessionUpdate::Error { message: None });
        }
        seq
    }

    pub(crate) fn resolve_prediction(
        &self,
        seq: u64,
        result: Result<PredictionEvent, String>,
    ) -> Resolution<Arc<PredictionEvent>> {
        let mut state = self.state();
        if !state.prediction_requests.accepts(seq) {
            return Resolution::Superseded;
        }
        let latest = state.prediction_requests.is_latest(seq);

        match result {
            Ok(event) => {
                if state.subject_id.as_deref() != Some(event.subject_id.as_str()) {
                    if latest {
                        release_prediction(&mut state);
                    }
                    return Resolution::Superseded;
                }
                let event = Arc::new(event);
                state.prediction_requests.applied = seq;
                state.prediction = Some(Arc::clone(&event));
                if latest {
                    state.prediction_requests.pending = false;
                    state.phase = PredictionPhase::HasPrediction;
                }
                self.history().append(Arc::clone(&event));
                drop(state);

                self.emit(SessionUpdate::Prediction {
                    prediction: Arc::clone(&event),
                });
                Resolution::Applied(event)
            }
            // A failure only matters if nothing newer is still in flight
            Err(_) if !latest => Resolution::Superseded,
            Err(message) => {
                state.prediction_requests.pending = false;
                state.phase = PredictionPhase::HasError;
                state.last_error = Some(message.clone());
                drop(state);

                self.emit(SessionUpdate::Error {
                    message: Some(message.clone()),
                });
                Resolution::Failed(message)
            }
        }
    }

    /// Release the loading state of a request whose future was dropped
    pub(crate) fn abandon_prediction(&self, seq: u64) {
        let mut state = self.state();
        if state.prediction_requests.is_latest(seq) && state.prediction_requests.pending {
            release_prediction(&mut state);
        }
    }

    pub(crate) fn issue_schedule(&self) -> u64 {
        let (seq, had_error) = {
            let mut state = self.state();
            let had_error = state.last_error.take().is_some();
            (state.schedule_requests.issue(), had_error)
        };
        if had_error {
            self.emit(SessionUpdate::Error { message: None });
        }
        seq
    }

    pub(crate) fn resolve_schedule(
        &self,
        seq: u64,
        result: Result<Schedule, String>,
    ) -> Resolution<Arc<Schedule>> {
        let mut state = self.state();
        if !state.schedule_requests.accepts(seq) {
            return Resolution::Superseded;
        }
        let latest = state.schedule_requests.is_latest(seq);

        match result {
            Ok(schedule) => {
                if state.subject_id.as_deref() != Some(schedule.subject_id.as_str()) {
                    if latest {
                        state.schedule_requests.pending = false;
                    }
                    return Resolution::Superseded;
                }
                let schedule = Arc::new(schedule);
                state.schedule_requests.applied = seq;
                state.schedule = Some(Arc::clone(&schedule));
                if latest {
                    state.schedule_requests.pending = false;
                }
                drop(state);

                self.emit(SessionUpdate::Schedule {
                    schedule: Arc::clone(&schedule),
                });
                Resolution::Applied(schedule)
            }
            Err(_) if !latest => Resolution::Superseded,
            Err(message) => {
                // Previous schedule is kept
                state.schedule_requests.pending = false;
                state.last_error = Some(message.clone());
                drop(state);

                self.emit(SessionUpdate::Error {
                    message: Some(message.clone()),
                });
                Resolution::Failed(message)
            }
        }
    }

    pub(crate) fn abandon_schedule(&self, seq: u64) {
        let mut state = self.state();
        if state.schedule_requests.is_latest(seq) {
            state.schedule_requests.pending = false;
        }
    }
}

/// Settle the prediction phase without a result
fn release_prediction(state: &mut SessionState) {
    state.prediction_requests.pending = false;
    state.phase = if state.prediction.is_some() {
        PredictionPhase::HasPrediction
    } else {
        PredictionPhase::Idle
    };
}
