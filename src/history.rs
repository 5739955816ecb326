use crate::prediction::PredictionEvent;
use std::collections::VecDeque;
use std::sync::Arc;

/// Default number of predictions kept for charting
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Fixed-capacity, arrival-ordered ring buffer of prediction events.
///
/// Writes are append-only with oldest-first eviction. Reads hand out an owned
/// snapshot, so consumers can never reach the internal buffer.
#[derive(Debug)]
pub struct HistoryBuffer {
    events: VecDeque<Arc<PredictionEvent>>,
    capacity: usize,
}

impl HistoryBuffer {
    /// Capacity is clamped to at least one entry
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append to the end, returning the evicted event if the buffer was full
    pub fn append(&mut self, event: Arc<PredictionEvent>) -> Option<Arc<PredictionEvent>> {
        let evicted = if self.events.len() == self.capacity {
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);
        evicted
    }

    /// Ordered copy of the buffer, most recent last
    pub fn snapshot(&self) -> Vec<Arc<PredictionEvent>> {
        self.events.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<Arc<PredictionEvent>> {
        self.events.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Only used when the session rebinds to another subject
    pub(crate) fn reset(&mut self) {
        self.events.clear();
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
