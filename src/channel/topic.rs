use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_NAMESPACE: &str = "ai/irrigation";

/// Kind segment of a subject topic
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopicKind {
    Prediction,
    Recommendation,
    Alert,
    /// Raw sensor rows pushed by the device gateway
    #[serde(rename = "sensor-data")]
    SensorData,
}

impl TopicKind {
    pub const ALL: [TopicKind; 4] = [
        TopicKind::Prediction,
        TopicKind::Recommendation,
        TopicKind::Alert,
        TopicKind::SensorData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TopicKind::Prediction => "prediction",
            TopicKind::Recommendation => "recommendation",
            TopicKind::Alert => "alert",
            TopicKind::SensorData => "sensor-data",
        }
    }

    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "prediction" => Some(TopicKind::Prediction),
            "recommendation" => Some(TopicKind::Recommendation),
            "alert" => Some(TopicKind::Alert),
            "sensor-data" => Some(TopicKind::SensorData),
            _ => None,
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format `<namespace>/<kind>/<subjectId>`
pub fn topic_for(namespace: &str, kind: TopicKind, subject_id: &str) -> String {
    format!("{}/{}/{}", namespace.trim_end_matches('/'), kind, subject_id)
}

/// All topics of one subject, in [`TopicKind::ALL`] order
pub fn subject_topics(namespace: &str, subject_id: &str) -> Vec<String> {
    TopicKind::ALL
        .iter()
        .map(|kind| topic_for(namespace, *kind, subject_id))
        .collect()
}

/// Split a topic into kind and subject id.
///
/// Returns None for topics outside the namespace, unknown kinds, or
/// subject segments that are empty or nested.
pub fn parse_topic<'a>(namespace: &str, topic: &'a str) -> Option<(TopicKind, &'a str)> {
    let rest = topic
        .strip_prefix(namespace.trim_end_matches('/'))?
        .strip_prefix('/')?;
    let (kind, subject_id) = rest.split_once('/')?;
    if subject_id.is_empty() || subject_id.contains('/') {
        return None;
    }
    Some((TopicKind::parse(kind)?, subject_id))
}
