use crate::alerts::AlertEntry;
use crate::prediction::{PredictionEvent, Recommendation, Schedule};
use crate::reading::SensorReading;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Change notification broadcast to session subscribers (WebSocket clients, UI)
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionUpdate {
    SubjectChanged {
        #[serde(rename = "subjectId")]
        subject_id: Option<String>,
    },
    Reading {
        reading: Arc<SensorReading>,
    },
    Prediction {
        prediction: Arc<PredictionEvent>,
    },
    Schedule {
        schedule: Arc<Schedule>,
    },
    Recommendation {
        recommendation: Arc<Recommendation>,
    },
    Error {
        message: Option<String>,
    },
    Poll {
        active: bool,
        loading: bool,
    },
    AlertRaised {
        alert: Arc<AlertEntry>,
    },
    AlertExpired {
        id: Uuid,
    },
    AlertsCleared {
        count: usize,
    },
}

impl SessionUpdate {
    /// Wire name of the update, as in its `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            SessionUpdate::SubjectChanged { .. } => "subject_changed",
            SessionUpdate::Reading { .. } => "reading",
            SessionUpdate::Prediction { .. } => "prediction",
            SessionUpdate::Schedule { .. } => "schedule",
            SessionUpdate::Recommendation { .. } => "recommendation",
            SessionUpdate::Error { .. } => "error",
            SessionUpdate::Poll { .. } => "poll",
            SessionUpdate::AlertRaised { .. } => "alert_raised",
            SessionUpdate::AlertExpired { .. } => "alert_expired",
            SessionUpdate::AlertsCleared { .. } => "alerts_cleared",
        }
    }
}
