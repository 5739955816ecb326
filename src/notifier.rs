use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// User-facing notification capability (toast, push notification, ...).
///
/// Fire-and-forget: callers run it detached and only log failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str, severity: Severity) -> Result<()>;
}

/// Writes notifications to the log; the default when no UI is attached
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, body: &str, severity: Severity) -> Result<()> {
        match severity {
            Severity::Info => info!(title = %title, "{}", body),
            Severity::Warning | Severity::Critical => {
                warn!(title = %title, severity = ?severity, "{}", body)
            }
        }
        Ok(())
    }
}

/// Run `notify` on a detached task; a failure is only logged
pub fn notify_detached(
    notifier: &Arc<dyn Notifier>,
    title: &'static str,
    body: impl Into<String>,
    severity: Severity,
) {
    let notifier = Arc::clone(notifier);
    let body = body.into();
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(title, &body, severity).await {
            warn!(title = %title, error = %e, "Notifier failed");
        }
    });
}
