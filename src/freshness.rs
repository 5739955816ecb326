use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Default window after which a reading is considered stale
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_millis(10_000);

/// Freshness of the last successful update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Nothing has been received yet
    Unknown,
    Fresh,
    Stale,
}

impl Freshness {
    /// Unknown counts as stale: it is never reported as fresh.
    pub fn is_stale(self) -> bool {
        !matches!(self, Freshness::Fresh)
    }
}

/// Classify `last_update` against `threshold` at `now`.
///
/// Stale once `now - last_update` strictly exceeds the threshold. Uses the
/// tokio clock so behaviour follows paused time in tests.
pub fn freshness(last_update: Option<Instant>, now: Instant, threshold: Duration) -> Freshness {
    match last_update {
        None => Freshness::Unknown,
        Some(last) if now.saturating_duration_since(last) > threshold => Freshness::Stale,
        Some(_) => Freshness::Fresh,
    }
}

pub fn is_stale(last_update: Option<Instant>, now: Instant, threshold: Duration) -> bool {
    freshness(last_update, now, threshold).is_stale()
}
