// Shared fakes for session and API integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use plant_sync::channel::InMemoryTransport;
use plant_sync::config::SyncConfig;
use plant_sync::notifier::{Notifier, Severity};
use plant_sync::orchestrator::PredictionService;
use plant_sync::poll::SensorSource;
use plant_sync::prediction::{
    PredictionEvent, PredictionSource, Recommendation, Schedule, ScheduleInput,
};
use plant_sync::reading::SensorReading;
use plant_sync::session::{SessionDeps, SyncSession};
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug)]
pub enum Reply {
    Moisture(f64),
    Empty,
    Fail,
}

/// Sensor source answering from a script, then from a fallback
pub struct FakeSensors {
    script: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    calls: AtomicUsize,
    subjects: Mutex<Vec<String>>,
}

impl FakeSensors {
    pub fn new(fallback: Reply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            calls: AtomicUsize::new(0),
            subjects: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, reply: Reply) -> Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    pub fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock().unwrap() = reply;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn subjects(&self) -> Vec<String> {
        self.subjects.lock().unwrap().clone()
    }
}

#[async_trait]
impl SensorSource for FakeSensors {
    async fn fetch(&self, subject_id: &str, _count: usize) -> anyhow::Result<Vec<SensorReading>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.subjects.lock().unwrap().push(subject_id.to_string());
        let scripted = self.script.lock().unwrap().pop_front();
        let reply = scripted.unwrap_or(*self.fallback.lock().unwrap());
        match reply {
            Reply::Moisture(value) => Ok(vec![reading(subject_id, value)]),
            Reply::Empty => Ok(Vec::new()),
            Reply::Fail => anyhow::bail!("sensor service unavailable"),
        }
    }
}

/// Prediction service answering with a fixed confidence
pub struct FakePredictions {
    confidence: Mutex<Option<f64>>,
    calls: AtomicUsize,
    advice: Mutex<Vec<&'static str>>,
}

impl FakePredictions {
    pub fn new(confidence: f64) -> Self {
        Self {
            confidence: Mutex::new(Some(confidence)),
            calls: AtomicUsize::new(0),
            advice: Mutex::new(Vec::new()),
        }
    }

    /// Stored recommendation actions returned on bind
    pub fn set_advice(&self, actions: &[&'static str]) {
        *self.advice.lock().unwrap() = actions.to_vec();
    }

    /// Every following call fails
    pub fn fail(&self) {
        *self.confidence.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PredictionService for FakePredictions {
    async fn predict(&self, subject_id: &str, _reading: &SensorReading) -> anyhow::Result<PredictionEvent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(confidence) = *self.confidence.lock().unwrap() else {
            anyhow::bail!("prediction service unavailable");
        };
        Ok(PredictionEvent {
            subject_id: subject_id.to_string(),
            should_water: confidence >= 0.5,
            confidence,
            water_amount: Some(200.0),
            hours_until_water: Some(6.0),
            explanation: None,
            timestamp: Utc::now(),
            source: PredictionSource::Request,
        })
    }

    async fn create_schedule(&self, subject_id: &str, input: &ScheduleInput) -> anyhow::Result<Schedule> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Schedule {
            subject_id: subject_id.to_string(),
            plan: json!({ "days": input.horizon_days, "slots": ["06:00"] }),
            created_at: Utc::now(),
        })
    }

    async fn recommendations(&self, subject_id: &str) -> anyhow::Result<Vec<Recommendation>> {
        let actions = self.advice.lock().unwrap().clone();
        Ok(actions
            .into_iter()
            .map(|action| Recommendation::from_wire(subject_id, &json!({ "action": action }), Utc::now()))
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub titles: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, _body: &str, _severity: Severity) -> anyhow::Result<()> {
        self.titles.lock().unwrap().push(title.to_string());
        Ok(())
    }
}

pub fn reading(subject_id: &str, moisture: f64) -> SensorReading {
    let mut metrics = BTreeMap::new();
    metrics.insert("moisture".to_string(), moisture);
    SensorReading::new(subject_id, metrics, Utc::now())
}

pub struct Harness {
    pub session: Arc<SyncSession>,
    pub transport: Arc<InMemoryTransport>,
    pub sensors: Arc<FakeSensors>,
    pub predictions: Arc<FakePredictions>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn config_for(subject_id: Option<&str>) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.session.subject_id = subject_id.map(str::to_string);
    config
}

pub fn harness(config: &SyncConfig, sensors: FakeSensors) -> Harness {
    let transport = Arc::new(InMemoryTransport::connected());
    let sensors = Arc::new(sensors);
    let predictions = Arc::new(FakePredictions::new(0.6));
    let notifier = Arc::new(RecordingNotifier::default());

    let session = SyncSession::new(
        config,
        SessionDeps {
            sensor_source: sensors.clone(),
            prediction_service: predictions.clone(),
            transport: transport.clone(),
            notifier: Some(notifier.clone()),
        },
    );

    Harness {
        session: Arc::new(session),
        transport,
        sensors,
        predictions,
        notifier,
    }
}

/// Let spawned tasks run; with paused time this also advances the clock
pub async fn advance(ms: u64) {
    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
}
