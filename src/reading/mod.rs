use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod normalize;

pub use normalize::{normalize_reading, ReadingError, FIELD_ALIASES};
pub(crate) use normalize::parse_timestamp;

pub const MOISTURE: &str = "moisture";
pub const TEMPERATURE: &str = "temperature";
pub const HUMIDITY: &str = "humidity";
pub const LIGHT: &str = "light";

/// SensorReading is an immutable, canonical sample for one subject.
///
/// Metrics are keyed by name rather than fixed fields, so new sensors need no
/// schema change. Known aliases are folded into canonical names at ingestion
/// (see [`normalize_reading`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(rename = "subjectId")]
    pub subject_id: String,

    pub metrics: BTreeMap<String, f64>,

    #[serde(rename = "capturedAt")]
    pub captured_at: DateTime<Utc>,
}

impl SensorReading {
    pub fn new(
        subject_id: impl Into<String>,
        metrics: BTreeMap<String, f64>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            metrics,
            captured_at,
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn moisture(&self) -> Option<f64> {
        self.metric(MOISTURE)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.metric(TEMPERATURE)
    }

    pub fn humidity(&self) -> Option<f64> {
        self.metric(HUMIDITY)
    }

    pub fn light(&self) -> Option<f64> {
        self.metric(LIGHT)
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// True when both readings carry the same metric values (timestamps ignored)
    pub fn same_values(&self, other: &SensorReading) -> bool {
        self.metrics == other.metrics
    }

    /// Request body for the prediction service
    pub fn to_payload(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        body.insert("plantId".to_string(), self.subject_id.clone().into());
        for (name, value) in &self.metrics {
            body.insert(name.clone(), (*value).into());
        }
        body.insert("timestamp".to_string(), self.captured_at.to_rfc3339().into());
        serde_json::Value::Object(body)
    }
}
