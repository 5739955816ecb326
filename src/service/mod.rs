// HTTP adapters for the sensor and AI prediction REST endpoints


use crate::orchestrator::PredictionService;
use crate::poll::SensorSource;
use crate::prediction::{PredictionEvent, PredictionSource, Recommendation, Schedule, ScheduleInput};
use crate::reading::{normalize_reading, SensorReading};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Service configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout_ms: 10_000,
        }
    }
}

/// HTTP client for the product REST API.
///
/// Implements both [`SensorSource`] and [`PredictionService`]. Responses may
/// come bare or wrapped in a `{success, data, message}` envelope.
pub struct ServiceClient {
    http_client: Client,
    base_url: String,
}

impl ServiceClient {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent("plant-sync/0.1")
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .context("Failed to reach sensor service")?;
        read_json(response).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        let response = self
            .http_client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to reach prediction service")?;
        read_json(response).await
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        // Services put a readable reason in `message` even on errors
        let message = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string));
        return Err(match message {
            Some(message) => anyhow!("service error {}: {}", status, message),
            None => anyhow!("service error {}", status),
        });
    }
    response
        .json::<Value>()
        .await
        .context("Failed to parse service response")
}

/// Strip the `{success, <field>, message}` envelope.
///
/// `success: false` is turned into an error carrying `message`. Bodies
/// without a `success` flag are returned unchanged.
fn unwrap_envelope(body: Value, fields: &[&str]) -> Result<Value> {
    let Some(object) = body.as_object() else {
        return Ok(body);
    };
    let Some(success) = object.get("success").and_then(Value::as_bool) else {
        return Ok(body);
    };
    if !success {
        let message = object
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("service reported failure");
        bail!("{}", message);
    }
    fields
        .iter()
        .find_map(|field| object.get(*field).filter(|v| !v.is_null()).cloned())
        .ok_or_else(|| anyhow!("service response missing '{}'", fields.join("' or '")))
}

#[async_trait]
impl SensorSource for ServiceClient {
    async fn fetch(&self, subject_id: &str, count: usize) -> Result<Vec<SensorReading>> {
        let url = format!(
            "{}/api/plants/{}/sensors?limit={}",
            self.base_url, subject_id, count
        );
        let body = self
            .get_json(&url)
            .await
            .context("Failed to fetch sensor data")?;
        let rows = match unwrap_envelope(body, &["data"])? {
            Value::Array(rows) => rows,
            Value::Null => Vec::new(),
            single @ Value::Object(_) => vec![single],
            other => bail!("unexpected sensor payload: {}", other),
        };

        let received_at = Utc::now();
        let readings: Vec<SensorReading> = rows
            .iter()
            .filter_map(|row| match normalize_reading(subject_id, row, received_at) {
                Ok(reading) => Some(reading),
                Err(e) => {
                    debug!(subject_id = %subject_id, error = %e, "Skipping sensor row");
                    None
                }
            })
            .collect();
        Ok(readings)
    }
}

#[async_trait]
impl PredictionService for ServiceClient {
    async fn predict(&self, subject_id: &str, reading: &SensorReading) -> Result<PredictionEvent> {
        let url = format!("{}/api/ai/irrigation/predict/{}", self.base_url, subject_id);
        let body = self
            .post_json(&url, &reading.to_payload())
            .await
            .context("Prediction request failed")?;
        let payload = unwrap_envelope(body, &["prediction", "data"])?;

        PredictionEvent::from_wire(subject_id, &payload, PredictionSource::Request, Utc::now())
            .context("Invalid prediction response")
    }

    async fn create_schedule(&self, subject_id: &str, input: &ScheduleInput) -> Result<Schedule> {
        let url = format!("{}/api/ai/irrigation/optimize/{}", self.base_url, subject_id);
        let request = json!({
            "plantId": subject_id,
            "horizonDays": input.horizon_days,
            "preferences": input.preferences,
        });
        let body = self
            .post_json(&url, &request)
            .await
            .context("Schedule request failed")?;
        let plan = unwrap_envelope(body, &["schedule", "data"])?;

        Ok(Schedule {
            subject_id: subject_id.to_string(),
            plan,
            created_at: Utc::now(),
        })
    }

    async fn recommendations(&self, subject_id: &str) -> Result<Vec<Recommendation>> {
        let url = format!(
            "{}/api/ai/irrigation/recommendations/{}",
            self.base_url, subject_id
        );
        let body = self
            .get_json(&url)
            .await
            .context("Recommendations request failed")?;
        let rows = match unwrap_envelope(body, &["recommendations", "data"])? {
            Value::Array(rows) => rows,
            Value::Null => Vec::new(),
            other => bail!("unexpected recommendations payload: {}", other),
        };

        let received_at = Utc::now();
        Ok(rows
            .iter()
            .map(|row| Recommendation::from_wire(subject_id, row, received_at))
            .collect())
    }
}
