use crate::reading::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;


/// Path a prediction arrived on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    Push,
    Request,
}

/// PredictionEvent is an immutable irrigation prediction for one subject.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionEvent {
    #[serde(rename = "subjectId")]
    pub subject_id: String,

    #[serde(rename = "shouldWater")]
    pub should_water: bool,

    /// Model confidence in [0, 1]
    pub confidence: f64,

    /// Suggested water amount (ml)
    #[serde(rename = "waterAmount", skip_serializing_if = "Option::is_none")]
    pub water_amount: Option<f64>,

    #[serde(rename = "hoursUntilWater", skip_serializing_if = "Option::is_none")]
    pub hours_until_water: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,

    pub timestamp: DateTime<Utc>,

    pub source: PredictionSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    NotAnObject,
    MissingField(&'static str),
    ConfidenceOutOfRange(f64),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::NotAnObject => write!(f, "payload must be a JSON object"),
            DecodeError::MissingField(name) => write!(f, "missing or invalid field '{}'", name),
            DecodeError::ConfidenceOutOfRange(c) => {
                write!(f, "confidence must be within [0, 1], got {}", c)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl PredictionEvent {
    /// Decode a prediction payload.
    ///
    /// Accepts the service envelope (`{"prediction": {...}, "timestamp": ...}`)
    /// as well as a flat object carrying the same camelCase fields. The
    /// timestamp falls back to `received_at` when absent or unparsable.
    pub fn from_wire(
        subject_id: &str,
        payload: &Value,
        source: PredictionSource,
        received_at: DateTime<Utc>,
    ) -> Result<Self, DecodeError> {
        let envelope = payload.as_object().ok_or(DecodeError::NotAnObject)?;
        let body = envelope
            .get("prediction")
            .and_then(Value::as_object)
            .unwrap_or(envelope);

        let should_water = body
            .get("shouldWater")
            .and_then(Value::as_bool)
            .ok_or(DecodeError::MissingField("shouldWater"))?;

        let confidence = body
            .get("confidence")
            .and_then(Value::as_f64)
            .ok_or(DecodeError::MissingField("confidence"))?;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(DecodeError::ConfidenceOutOfRange(confidence));
        }

        let timestamp = body
            .get("timestamp")
            .or_else(|| envelope.get("timestamp"))
            .and_then(parse_timestamp)
            .unwrap_or(received_at);

        Ok(Self {
            subject_id: subject_id.to_string(),
            should_water,
            confidence,
            water_amount: body.get("waterAmount").and_then(Value::as_f64),
            hours_until_water: body.get("hoursUntilWater").and_then(Value::as_f64),
            explanation: body
                .get("explanation")
                .and_then(Value::as_str)
                .map(str::to_string),
            timestamp,
            source,
        })
    }
}

/// Irrigation recommendation pushed by the AI service (opaque body)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "subjectId")]
    pub subject_id: String,

    pub body: Value,

    #[serde(rename = "receivedAt")]
    pub received_at: DateTime<Utc>,
}

impl Recommendation {
    /// Unwraps the `recommendation` envelope field when present
    pub fn from_wire(subject_id: &str, payload: &Value, received_at: DateTime<Utc>) -> Self {
        let body = payload
            .get("recommendation")
            .cloned()
            .unwrap_or_else(|| payload.clone());
        Self {
            subject_id: subject_id.to_string(),
            body,
            received_at,
        }
    }
}

pub const MAX_SCHEDULE_HORIZON_DAYS: u32 = 30;

/// Parameters for schedule optimization
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleInput {
    /// Number of days to plan ahead
    #[serde(rename = "horizonDays", default = "default_horizon_days")]
    pub horizon_days: u32,

    /// Free-form preferences forwarded to the service (preferred times, limits, ...)
    #[serde(default)]
    pub preferences: Map<String, Value>,
}

fn default_horizon_days() -> u32 {
    7
}

impl Default for ScheduleInput {
    fn default() -> Self {
        Self {
            horizon_days: default_horizon_days(),
            preferences: Map::new(),
        }
    }
}

impl ScheduleInput {
    pub fn validate(&self) -> Result<(), String> {
        if self.horizon_days == 0 || self.horizon_days > MAX_SCHEDULE_HORIZON_DAYS {
            return Err(format!(
                "horizonDays must be between 1 and {}, got {}",
                MAX_SCHEDULE_HORIZON_DAYS, self.horizon_days
            ));
        }
        Ok(())
    }
}

/// Irrigation schedule returned by the service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(rename = "subjectId")]
    pub subject_id: String,

    pub plan: Value,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}
