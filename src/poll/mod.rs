// Pull path: one periodic sensor fetch loop, aware of app lifecycle

mod controller;
#[cfg(test)]
mod tests;

pub use controller::{PollController, NO_SENSOR_DATA};

use crate::reading::SensorReading;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Source of sensor readings (REST endpoint, local device, fake)
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Up to `count` recent readings for a subject, in any order
    async fn fetch(&self, subject_id: &str, count: usize) -> Result<Vec<SensorReading>>;
}

/// Foreground state reported by the host application
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppLifecycle {
    #[default]
    Active,
    Inactive,
    Background,
}

/// What a lifecycle transition did to the poll loop
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleAction {
    None,
    Paused,
    Resumed,
}
