// On-demand prediction and schedule requests, stamped so late responses lose


use crate::error::{SyncError, ValidationError};
use crate::notifier::{notify_detached, Notifier, Severity};
use crate::prediction::{PredictionEvent, Recommendation, Schedule, ScheduleInput};
use crate::reading::SensorReading;
use crate::state::{Resolution, StateStore};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Remote AI capability producing predictions and schedules
#[async_trait]
pub trait PredictionService: Send + Sync {
    async fn predict(&self, subject_id: &str, reading: &SensorReading) -> Result<PredictionEvent>;

    async fn create_schedule(&self, subject_id: &str, input: &ScheduleInput) -> Result<Schedule>;

    /// Stored recommendations for a subject, newest first
    async fn recommendations(&self, _subject_id: &str) -> Result<Vec<Recommendation>> {
        Ok(Vec::new())
    }
}

#[derive(Clone, Copy)]
enum RequestKind {
    Prediction,
    Schedule,
}

/// Releases the loading state if the request future is dropped mid-flight
struct InFlight<'a> {
    store: &'a StateStore,
    kind: RequestKind,
    seq: u64,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn new(store: &'a StateStore, kind: RequestKind, seq: u64) -> Self {
        Self {
            store,
            kind,
            seq,
            settled: false,
        }
    }

    fn settle(mut self) -> u64 {
        self.settled = true;
        self.seq
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        debug!(request = self.seq, "Request dropped before completion");
        match self.kind {
            RequestKind::Prediction => self.store.abandon_prediction(self.seq),
            RequestKind::Schedule => self.store.abandon_schedule(self.seq),
        }
    }
}

/// Orchestrator runs request/response calls against the prediction service
/// and resolves them into the shared state.
///
/// Requests may overlap. Each is stamped in issue order and a response is
/// applied only if nothing newer has been applied since.
///
/// Request failures and created schedules are reported through the
/// notifier, when one is attached.
pub struct Orchestrator {
    store: Arc<StateStore>,
    service: Arc<dyn PredictionService>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Orchestrator {
    pub fn new(store: Arc<StateStore>, service: Arc<dyn PredictionService>) -> Self {
        Self {
            store,
            service,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Option<Arc<dyn Notifier>>) -> Self {
        self.notifier = notifier;
        self
    }

    fn notify(&self, title: &'static str, body: &str, severity: Severity) {
        if let Some(notifier) = &self.notifier {
            notify_detached(notifier, title, body, severity);
        }
    }

    /// Record a local validation failure and hand it back
    fn reject(&self, error: ValidationError) -> SyncError {
        self.store.set_error(error.to_string());
        SyncError::Validation(error)
    }

    fn require_subject<'s>(&self, subject_id: Option<&'s str>) -> Result<&'s str, SyncError> {
        subject_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| self.reject(ValidationError::MissingSubject))
    }

    /// Ask the service for a prediction from `reading`.
    ///
    /// No I/O happens when the subject or reading is missing; the
    /// validation error is recorded as the last error and returned.
    pub async fn request_prediction(
        &self,
        subject_id: Option<&str>,
        reading: Option<&SensorReading>,
    ) -> Result<Arc<PredictionEvent>, SyncError> {
        let subject_id = self.require_subject(subject_id)?;
        let reading = match reading {
            None => return Err(self.reject(ValidationError::MissingReading)),
            Some(reading) if reading.is_empty() => {
                return Err(self.reject(ValidationError::EmptyReading))
            }
            Some(reading) => reading,
        };

        let guard = InFlight::new(
            &self.store,
            RequestKind::Prediction,
            self.store.issue_prediction(),
        );
        debug!(subject_id = %subject_id, request = guard.seq, "Requesting prediction");

        let result = self
            .service
            .predict(subject_id, reading)
            .await
            .map_err(|e| format!("{:#}", e));
        let seq = guard.settle();

        match self.store.resolve_prediction(seq, result) {
            Resolution::Applied(event) => {
                info!(
                    subject_id = %subject_id,
                    should_water = event.should_water,
                    confidence = event.confidence,
                    "Prediction received"
                );
                Ok(event)
            }
            Resolution::Failed(message) => {
                warn!(subject_id = %subject_id, error = %message, "Prediction request failed");
                self.notify("Prediction error", &message, Severity::Warning);
                Err(SyncError::Transport(message))
            }
            Resolution::Superseded => {
                debug!(subject_id = %subject_id, request = seq, "Discarding superseded prediction");
                Err(SyncError::Superseded { request: seq })
            }
        }
    }

    /// Ask the service for an irrigation schedule; a failure keeps the previous one
    pub async fn create_schedule(
        &self,
        subject_id: Option<&str>,
        input: &ScheduleInput,
    ) -> Result<Arc<Schedule>, SyncError> {
        let subject_id = self.require_subject(subject_id)?;
        if let Err(reason) = input.validate() {
            return Err(self.reject(ValidationError::InvalidSchedule(reason)));
        }

        let guard = InFlight::new(&self.store, RequestKind::Schedule, self.store.issue_schedule());
        debug!(subject_id = %subject_id, request = guard.seq, "Requesting schedule");

        let result = self
            .service
            .create_schedule(subject_id, input)
            .await
            .map_err(|e| format!("{:#}", e));
        let seq = guard.settle();

        match self.store.resolve_schedule(seq, result) {
            Resolution::Applied(schedule) => {
                info!(subject_id = %subject_id, "Schedule created");
                self.notify(
                    "Schedule created",
                    "Irrigation schedule has been created",
                    Severity::Info,
                );
                Ok(schedule)
            }
            Resolution::Failed(message) => {
                warn!(subject_id = %subject_id, error = %message, "Schedule request failed");
                self.notify("Schedule error", &message, Severity::Warning);
                Err(SyncError::Transport(message))
            }
            Resolution::Superseded => Err(SyncError::Superseded { request: seq }),
        }
    }

    /// Seed the recommendation list of `subject_id` from the service.
    ///
    /// Failures are logged only; pushed recommendations keep arriving either way.
    /// Returns how many were added.
    pub async fn load_recommendations(&self, subject_id: &str) -> usize {
        match self.service.recommendations(subject_id).await {
            Ok(recommendations) => {
                let added = self.store.seed_recommendations(subject_id, recommendations);
                debug!(subject_id = %subject_id, added, "Recommendations loaded");
                added
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(subject_id = %subject_id, error = %message, "Failed to load recommendations");
                0
            }
        }
    }
}
