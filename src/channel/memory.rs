use super::Transport;
use anyhow::{bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

/// Loopback transport: messages published here go straight to local subscribers.
///
/// Used by tests and by local runs without a broker.
pub struct InMemoryTransport {
    connected: AtomicBool,
    topics: DashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            topics: DashMap::new(),
        }
    }

    /// Starts out connected
    pub fn connected() -> Self {
        let transport = Self::new();
        transport.set_connected(true);
        transport
    }

    /// Simulate a connection drop or recovery
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Deliver a payload to every live subscriber of `topic`; returns how many received it
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        let payload = payload.into();
        let Some(mut senders) = self.topics.get_mut(topic) else {
            return 0;
        };
        senders.retain(|tx| tx.send(payload.clone()).is_ok());
        senders.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self) -> Result<()> {
        self.set_connected(true);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Vec<u8>>> {
        if !self.is_connected() {
            bail!("in-memory transport is disconnected");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics.entry(topic.to_string()).or_default().push(tx);
        debug!(topic = %topic, "In-memory subscription opened");
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        // Dropping the senders ends the subscriber streams
        self.topics.remove(topic);
        Ok(())
    }
}
