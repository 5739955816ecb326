use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub use crate::channel::NatsConfig;
pub use crate::service::ServiceConfig;

use crate::alerts::{DEFAULT_ALERT_CAPACITY, DEFAULT_ALERT_TTL};
use crate::channel::DEFAULT_NAMESPACE;
use crate::freshness::DEFAULT_STALE_THRESHOLD;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::poll::DEFAULT_POLL_INTERVAL_MS;

/// Complete plant-sync configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub recommendations: RecommendationsConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Session behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Subject bound at startup
    #[serde(default)]
    pub subject_id: Option<String>,
    /// Request a prediction whenever polled sensor values change
    #[serde(default = "default_true")]
    pub auto_predict: bool,
    /// Notify the user on urgent watering alerts
    #[serde(default = "default_true")]
    pub enable_alerts: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            subject_id: None,
            auto_predict: true,
            enable_alerts: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_threshold_ms: u64,
    #[serde(default = "default_readings_per_fetch")]
    pub readings_per_fetch: usize,
}

fn default_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_stale_threshold_ms() -> u64 {
    DEFAULT_STALE_THRESHOLD.as_millis() as u64
}

fn default_readings_per_fetch() -> usize {
    1
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            stale_threshold_ms: default_stale_threshold_ms(),
            readings_per_fetch: default_readings_per_fetch(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_threshold_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_alert_capacity")]
    pub capacity: usize,
    #[serde(default = "default_alert_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_alert_capacity() -> usize {
    DEFAULT_ALERT_CAPACITY
}

fn default_alert_ttl_ms() -> u64 {
    DEFAULT_ALERT_TTL.as_millis() as u64
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            capacity: default_alert_capacity(),
            ttl_ms: default_alert_ttl_ms(),
        }
    }
}

impl AlertsConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationsConfig {
    #[serde(default = "default_recommendation_capacity")]
    pub capacity: usize,
}

fn default_recommendation_capacity() -> usize {
    10
}

impl Default for RecommendationsConfig {
    fn default() -> Self {
        Self {
            capacity: default_recommendation_capacity(),
        }
    }
}

/// Event channel configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Topic prefix, e.g. `ai/irrigation`
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// How often the binary re-establishes subscriptions after a drop (seconds)
    #[serde(default = "default_resubscribe_interval")]
    pub resubscribe_interval_seconds: u64,
    #[serde(default)]
    pub nats: NatsConfig,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_resubscribe_interval() -> u64 {
    5
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            resubscribe_interval_seconds: default_resubscribe_interval(),
            nats: NatsConfig::default(),
        }
    }
}

/// Consumer HTTP surface
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3100".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: impl AsRef<Path>) -> Result<SyncConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: SyncConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

impl SyncConfig {
    /// Apply `PLANT_SYNC_*` environment overrides on top of file values
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PLANT_SYNC_SUBJECT_ID") {
            self.session.subject_id = Some(v).filter(|s| !s.is_empty());
        }
        override_parsed(&lookup, "PLANT_SYNC_AUTO_PREDICT", &mut self.session.auto_predict);
        override_parsed(&lookup, "PLANT_SYNC_ENABLE_ALERTS", &mut self.session.enable_alerts);
        override_parsed(&lookup, "PLANT_SYNC_POLL_INTERVAL_MS", &mut self.poll.interval_ms);
        override_parsed(
            &lookup,
            "PLANT_SYNC_STALE_THRESHOLD_MS",
            &mut self.poll.stale_threshold_ms,
        );
        if let Some(v) = lookup("PLANT_SYNC_NAMESPACE") {
            self.channel.namespace = v;
        }
        if let Some(v) = lookup("PLANT_SYNC_NATS_URL") {
            self.channel.nats.url = v;
        }
        if let Some(v) = lookup("PLANT_SYNC_SERVICE_URL") {
            self.service.base_url = v;
        }
        override_parsed(&lookup, "PLANT_SYNC_SERVICE_TIMEOUT_MS", &mut self.service.timeout_ms);
        if let Some(v) = lookup("PLANT_SYNC_BIND_ADDR") {
            self.api.bind_addr = v;
        }
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => warn!(key = %key, value = %raw, "Ignoring unparsable config override"),
    }
}
