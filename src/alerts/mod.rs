// Alert lifecycle: capped list, per-alert expiry tasks, urgent notifications

mod manager;

pub use manager::{AlertManager, DEFAULT_ALERT_CAPACITY, DEFAULT_ALERT_TTL};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Category that additionally notifies the user
pub const URGENT_WATERING: &str = "urgent_watering";

/// Alert as received from the event channel, before it is stamped
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertInput {
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl AlertInput {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
            magnitude: None,
            level: None,
        }
    }

    pub fn is_urgent_watering(&self) -> bool {
        self.category == URGENT_WATERING
    }

    /// Decode an alert payload.
    ///
    /// Category comes from `alertType` or `type` (default `info`); the
    /// magnitude from `waterAmount` or `recommendation.waterAmount`.
    pub fn from_wire(payload: &Value) -> Option<Self> {
        let object = payload.as_object()?;
        let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);

        let category = text("alertType")
            .or_else(|| text("type"))
            .unwrap_or_else(|| "info".to_string());
        let magnitude = object
            .get("waterAmount")
            .and_then(Value::as_f64)
            .or_else(|| {
                object
                    .get("recommendation")
                    .and_then(|r| r.get("waterAmount"))
                    .and_then(Value::as_f64)
            });

        Some(Self {
            category,
            message: text("message").unwrap_or_default(),
            magnitude,
            level: text("level"),
        })
    }
}

/// AlertEntry is a visible alert; immutable once raised.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertEntry {
    pub id: Uuid,
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}
