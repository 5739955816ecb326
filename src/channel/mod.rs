// Event channel: topic subscriptions over a pluggable pub/sub transport

mod dispatch;
mod memory;
mod nats;
pub mod topic;


pub use dispatch::{decode_event, ChannelEvent, PayloadError};
pub use memory::InMemoryTransport;
pub use nats::{NatsConfig, NatsTransport};
pub use topic::{parse_topic, subject_topics, topic_for, TopicKind, DEFAULT_NAMESPACE};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{BoxStream, StreamExt};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pub/sub connection capability
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Open a subscription; the stream ends when the transport releases it
    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Vec<u8>>>;

    async fn unsubscribe(&self, topic: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelError {
    NotConnected { topic: String },
    AlreadySubscribed { topic: String },
    Transport { topic: String, message: String },
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::NotConnected { topic } => {
                write!(f, "cannot subscribe to '{}': channel not connected", topic)
            }
            ChannelError::AlreadySubscribed { topic } => {
                write!(f, "already subscribed to '{}'", topic)
            }
            ChannelError::Transport { topic, message } => {
                write!(f, "subscription to '{}' failed: {}", topic, message)
            }
        }
    }
}

impl std::error::Error for ChannelError {}

/// Callback invoked for each decoded event
pub type EventHandler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// EventChannel owns one dispatch task per subscribed topic.
pub struct EventChannel {
    transport: Arc<dyn Transport>,
    namespace: String,
    subscriptions: DashMap<String, JoinHandle<()>>,
}

impl EventChannel {
    pub fn new(transport: Arc<dyn Transport>, namespace: impl Into<String>) -> Self {
        Self {
            transport,
            namespace: namespace.into(),
            subscriptions: DashMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn connect(&self) -> Result<()> {
        self.transport.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Subscribe `handler` to one topic.
    ///
    /// Fails with `NotConnected` while disconnected and with
    /// `AlreadySubscribed` if the topic already has an active dispatch task.
    /// A topic whose stream was released by the transport counts as free.
    pub async fn subscribe(&self, topic: &str, handler: EventHandler) -> Result<(), ChannelError> {
        if !self.transport.is_connected() {
            return Err(ChannelError::NotConnected {
                topic: topic.to_string(),
            });
        }
        if self.is_subscribed(topic) {
            return Err(ChannelError::AlreadySubscribed {
                topic: topic.to_string(),
            });
        }

        let stream = self
            .transport
            .subscribe(topic)
            .await
            .map_err(|e| ChannelError::Transport {
                topic: topic.to_string(),
                message: format!("{:#}", e),
            })?;

        // Re-check: another caller may have won the race while we awaited
        match self.subscriptions.entry(topic.to_string()) {
            Entry::Occupied(slot) if !slot.get().is_finished() => {
                Err(ChannelError::AlreadySubscribed {
                    topic: topic.to_string(),
                })
            }
            Entry::Occupied(mut slot) => {
                let task = spawn_dispatch(self.namespace.clone(), topic.to_string(), stream, handler);
                slot.insert(task);
                info!(topic = %topic, "Resubscribed after stream ended");
                Ok(())
            }
            Entry::Vacant(slot) => {
                let task = spawn_dispatch(self.namespace.clone(), topic.to_string(), stream, handler);
                slot.insert(task);
                info!(topic = %topic, "Subscribed");
                Ok(())
            }
        }
    }

    /// Returns false when the topic was not subscribed
    pub async fn unsubscribe(&self, topic: &str) -> bool {
        let Some((_, task)) = self.subscriptions.remove(topic) else {
            return false;
        };
        task.abort();
        if let Err(e) = self.transport.unsubscribe(topic).await {
            warn!(topic = %topic, error = %e, "Transport unsubscribe failed");
        }
        info!(topic = %topic, "Unsubscribed");
        true
    }

    /// Subscribe all topics of a subject, or none of them
    pub async fn subscribe_subject(
        &self,
        subject_id: &str,
        handler: EventHandler,
    ) -> Result<Vec<String>, ChannelError> {
        let mut subscribed: Vec<String> = Vec::new();
        for topic in subject_topics(&self.namespace, subject_id) {
            if let Err(e) = self.subscribe(&topic, Arc::clone(&handler)).await {
                for done in &subscribed {
                    self.unsubscribe(done).await;
                }
                return Err(e);
            }
            subscribed.push(topic);
        }
        Ok(subscribed)
    }

    pub async fn unsubscribe_subject(&self, subject_id: &str) -> usize {
        let mut removed = 0;
        for topic in subject_topics(&self.namespace, subject_id) {
            if self.unsubscribe(&topic).await {
                removed += 1;
            }
        }
        removed
    }

    /// Move subscriptions from `old` to `new`; old topics are released first
    pub async fn switch_subject(
        &self,
        old: Option<&str>,
        new: Option<&str>,
        handler: EventHandler,
    ) -> Result<(), ChannelError> {
        if let Some(old) = old {
            self.unsubscribe_subject(old).await;
        }
        if let Some(new) = new {
            self.subscribe_subject(new, handler).await?;
        }
        Ok(())
    }

    pub async fn unsubscribe_all(&self) -> usize {
        let topics: Vec<String> = self
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut removed = 0;
        for topic in &topics {
            if self.unsubscribe(topic).await {
                removed += 1;
            }
        }
        removed
    }

    /// True while the topic's dispatch task is still receiving
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions
            .get(topic)
            .is_some_and(|task| !task.is_finished())
    }

    /// Sorted; topics whose stream has ended are left out
    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .map(|entry| entry.key().clone())
            .collect();
        topics.sort();
        topics
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        for entry in self.subscriptions.iter() {
            entry.value().abort();
        }
    }
}

fn spawn_dispatch(
    namespace: String,
    topic: String,
    mut stream: BoxStream<'static, Vec<u8>>,
    handler: EventHandler,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(payload) = stream.next().await {
            match decode_event(&namespace, &topic, &payload) {
                Ok(Some(event)) => handler(event),
                Ok(None) => debug!(topic = %topic, "Ignoring message on unrecognized topic"),
                Err(e) => warn!(topic = %topic, error = %e, "Dropping malformed payload"),
            }
        }
        debug!(topic = %topic, "Subscription stream ended");
    })
}
