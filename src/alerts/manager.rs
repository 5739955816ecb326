use super::{AlertEntry, AlertInput};
use crate::notifier::{notify_detached, Notifier, Severity};
use crate::state::SessionUpdate;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_ALERT_CAPACITY: usize = 5;
pub const DEFAULT_ALERT_TTL: Duration = Duration::from_millis(30_000);

/// Active alerts plus the scheduled expiry task of each one
#[derive(Default)]
struct AlertTable {
    /// Newest first
    active: VecDeque<Arc<AlertEntry>>,
    expiries: HashMap<Uuid, JoinHandle<()>>,
}

fn lock(table: &Mutex<AlertTable>) -> MutexGuard<'_, AlertTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Creates, caps and expires alerts.
///
/// Each raised alert gets an expiry task registered under its id. Eviction
/// by capacity, `clear_all` and drop all cancel the matching tasks, so an
/// expiry can never act on a list it no longer belongs to.
pub struct AlertManager {
    table: Arc<Mutex<AlertTable>>,
    capacity: usize,
    ttl: Duration,
    notifier: Option<Arc<dyn Notifier>>,
    updates_tx: broadcast::Sender<SessionUpdate>,
}

impl AlertManager {
    pub fn new(
        capacity: usize,
        ttl: Duration,
        notifier: Option<Arc<dyn Notifier>>,
        updates_tx: broadcast::Sender<SessionUpdate>,
    ) -> Self {
        Self {
            table: Arc::new(Mutex::new(AlertTable::default())),
            capacity: capacity.max(1),
            ttl,
            notifier,
            updates_tx,
        }
    }

    /// Stamp and insert an alert, scheduling its expiry.
    ///
    /// Must be called within a tokio runtime.
    pub fn raise(&self, input: AlertInput) -> Arc<AlertEntry> {
        let urgent = input.is_urgent_watering();
        let entry = Arc::new(AlertEntry {
            id: Uuid::now_v7(),
            category: input.category,
            message: input.message,
            magnitude: input.magnitude,
            level: input.level,
            created_at: Utc::now(),
        });

        {
            let mut table = lock(&self.table);
            table.active.push_front(Arc::clone(&entry));
            while table.active.len() > self.capacity {
                if let Some(evicted) = table.active.pop_back() {
                    if let Some(task) = table.expiries.remove(&evicted.id) {
                        task.abort();
                    }
                    debug!(alert_id = %evicted.id, "Alert evicted by capacity");
                }
            }
            let task = self.spawn_expiry(entry.id);
            table.expiries.insert(entry.id, task);
        }

        info!(
            alert_id = %entry.id,
            category = %entry.category,
            "Alert raised"
        );
        let _ = self.updates_tx.send(SessionUpdate::AlertRaised {
            alert: Arc::clone(&entry),
        });

        if urgent {
            self.notify_urgent(&entry);
        }

        entry
    }

    fn spawn_expiry(&self, id: Uuid) -> JoinHandle<()> {
        let table = Arc::downgrade(&self.table);
        let updates_tx = self.updates_tx.clone();
        let ttl = self.ttl;

        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;

            let Some(table) = table.upgrade() else {
                return;
            };
            let removed = {
                let mut table = lock(&table);
                table.expiries.remove(&id);
                let before = table.active.len();
                table.active.retain(|alert| alert.id != id);
                table.active.len() != before
            };

            if removed {
                debug!(alert_id = %id, "Alert expired");
                let _ = updates_tx.send(SessionUpdate::AlertExpired { id });
            }
        })
    }

    fn notify_urgent(&self, entry: &AlertEntry) {
        if let Some(notifier) = &self.notifier {
            debug!(alert_id = %entry.id, "Notifying urgent watering alert");
            notify_detached(notifier, "Urgent watering alert", entry.message.as_str(), Severity::Critical);
        }
    }

    /// Remove every alert and cancel all pending expiries; returns how many were removed
    pub fn clear_all(&self) -> usize {
        let count = {
            let mut table = lock(&self.table);
            for (_, task) in table.expiries.drain() {
                task.abort();
            }
            let count = table.active.len();
            table.active.clear();
            count
        };

        let _ = self.updates_tx.send(SessionUpdate::AlertsCleared { count });
        count
    }

    /// Newest first
    pub fn active(&self) -> Vec<Arc<AlertEntry>> {
        lock(&self.table).active.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.table).active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_expiries(&self) -> usize {
        lock(&self.table).expiries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for AlertManager {
    fn drop(&mut self) {
        for (_, task) in lock(&self.table).expiries.drain() {
            task.abort();
        }
    }
}
