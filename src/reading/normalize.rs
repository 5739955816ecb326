use super::{SensorReading, HUMIDITY, LIGHT, MOISTURE, TEMPERATURE};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Canonical metric name and the raw field names accepted for it, in lookup order.
pub const FIELD_ALIASES: &[(&str, &[&str])] = &[
    (MOISTURE, &["moisture", "soilMoisture", "soil_moisture"]),
    (TEMPERATURE, &["temperature", "temp"]),
    (
        HUMIDITY,
        &["humidity", "airHumidity", "air_humidity", "relativeHumidity", "relative_humidity"],
    ),
    (
        LIGHT,
        &["light", "lightIntensity", "light_intensity", "lightLevel", "light_level"],
    ),
];

/// Fields that describe the sample rather than measure anything
const META_FIELDS: &[&str] = &[
    "id",
    "_id",
    "dataId",
    "data_id",
    "plantId",
    "plant_id",
    "deviceId",
    "device_id",
    "timestamp",
    "createdAt",
    "created_at",
];

#[derive(Debug, Clone, PartialEq)]
pub enum ReadingError {
    NotAnObject,
    NoMetrics,
}

impl fmt::Display for ReadingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingError::NotAnObject => write!(f, "sensor payload must be a JSON object"),
            ReadingError::NoMetrics => write!(f, "sensor payload contains no numeric metrics"),
        }
    }
}

impl std::error::Error for ReadingError {}

/// Build a canonical [`SensorReading`] from a raw service payload.
///
/// Values are looked up on the top-level object first, then on a nested
/// `data` object. Aliased fields map to their canonical name (first alias
/// present wins); any other numeric field is kept under its own name.
/// The capture time comes from `timestamp`/`createdAt` (RFC 3339 or epoch
/// millis), falling back to `received_at`.
pub fn normalize_reading(
    subject_id: &str,
    raw: &Value,
    received_at: DateTime<Utc>,
) -> Result<SensorReading, ReadingError> {
    let top = raw.as_object().ok_or(ReadingError::NotAnObject)?;
    let nested = top.get("data").and_then(Value::as_object);

    let mut metrics = BTreeMap::new();
    let mut consumed: Vec<&str> = Vec::new();

    for (canonical, aliases) in FIELD_ALIASES {
        consumed.extend_from_slice(aliases);
        let value = aliases
            .iter()
            .find_map(|alias| lookup_number(top, nested, alias));
        if let Some(v) = value {
            metrics.insert(canonical.to_string(), v);
        }
    }

    for source in std::iter::once(top).chain(nested) {
        for (name, value) in source {
            if consumed.contains(&name.as_str()) || META_FIELDS.contains(&name.as_str()) {
                continue;
            }
            if let Some(v) = as_number(value) {
                metrics.entry(name.clone()).or_insert(v);
            }
        }
    }

    if metrics.is_empty() {
        return Err(ReadingError::NoMetrics);
    }

    let captured_at = ["timestamp", "createdAt", "created_at"]
        .iter()
        .find_map(|key| {
            top.get(*key)
                .or_else(|| nested.and_then(|n| n.get(*key)))
                .and_then(parse_timestamp)
        })
        .unwrap_or(received_at);

    Ok(SensorReading::new(subject_id, metrics, captured_at))
}

fn lookup_number(top: &Map<String, Value>, nested: Option<&Map<String, Value>>, key: &str) -> Option<f64> {
    top.get(key)
        .and_then(as_number)
        .or_else(|| nested.and_then(|n| n.get(key)).and_then(as_number))
}

/// Numbers, and numeric strings as some devices report them
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
