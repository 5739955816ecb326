use super::topic::{parse_topic, TopicKind};
use crate::alerts::AlertInput;
use crate::prediction::{DecodeError, PredictionEvent, PredictionSource, Recommendation};
use crate::reading::{normalize_reading, ReadingError, SensorReading};
use chrono::Utc;
use serde_json::Value;
use std::fmt;

/// Pushed event, decoded once from its topic and payload
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    Prediction(PredictionEvent),
    Recommendation(Recommendation),
    Alert { subject_id: String, input: AlertInput },
    Reading(SensorReading),
}

impl ChannelEvent {
    pub fn subject_id(&self) -> &str {
        match self {
            ChannelEvent::Prediction(event) => &event.subject_id,
            ChannelEvent::Recommendation(rec) => &rec.subject_id,
            ChannelEvent::Alert { subject_id, .. } => subject_id,
            ChannelEvent::Reading(reading) => &reading.subject_id,
        }
    }

    pub fn kind(&self) -> TopicKind {
        match self {
            ChannelEvent::Prediction(_) => TopicKind::Prediction,
            ChannelEvent::Recommendation(_) => TopicKind::Recommendation,
            ChannelEvent::Alert { .. } => TopicKind::Alert,
            ChannelEvent::Reading(_) => TopicKind::SensorData,
        }
    }
}

#[derive(Debug)]
pub enum PayloadError {
    Json(serde_json::Error),
    Prediction(DecodeError),
    Alert,
    Reading(ReadingError),
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadError::Json(e) => write!(f, "invalid JSON payload: {}", e),
            PayloadError::Prediction(e) => write!(f, "invalid prediction: {}", e),
            PayloadError::Alert => write!(f, "alert payload must be a JSON object"),
            PayloadError::Reading(e) => write!(f, "invalid sensor data: {}", e),
        }
    }
}

impl std::error::Error for PayloadError {}

/// Decode a message received on `topic`.
///
/// `Ok(None)` means the topic is not one of ours; the subject id always
/// comes from the topic, never from the payload.
pub fn decode_event(
    namespace: &str,
    topic: &str,
    payload: &[u8],
) -> Result<Option<ChannelEvent>, PayloadError> {
    let Some((kind, subject_id)) = parse_topic(namespace, topic) else {
        return Ok(None);
    };
    let value: Value = serde_json::from_slice(payload).map_err(PayloadError::Json)?;
    let received_at = Utc::now();

    let event = match kind {
        TopicKind::Prediction => ChannelEvent::Prediction(
            PredictionEvent::from_wire(subject_id, &value, PredictionSource::Push, received_at)
                .map_err(PayloadError::Prediction)?,
        ),
        TopicKind::Recommendation => ChannelEvent::Recommendation(Recommendation::from_wire(
            subject_id,
            &value,
            received_at,
        )),
        TopicKind::Alert => ChannelEvent::Alert {
            subject_id: subject_id.to_string(),
            input: AlertInput::from_wire(&value).ok_or(PayloadError::Alert)?,
        },
        TopicKind::SensorData => ChannelEvent::Reading(
            normalize_reading(subject_id, &value, received_at).map_err(PayloadError::Reading)?,
        ),
    };
    Ok(Some(event))
}
