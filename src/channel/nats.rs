use super::Transport;
use anyhow::{Context, Result};
use async_nats::connection::State;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::info;

/// NATS configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    /// Optional connection name shown in broker monitoring
    pub client_name: Option<String>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            client_name: Some("plant-sync".to_string()),
        }
    }
}

/// Broker-backed transport.
///
/// The client reconnects on its own after the initial connection; subject
/// subscriptions end when the dispatch task drops their stream.
pub struct NatsTransport {
    config: NatsConfig,
    client: OnceCell<async_nats::Client>,
}

impl NatsTransport {
    pub fn new(config: NatsConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&async_nats::Client> {
        self.client
            .get_or_try_init(|| async {
                info!("Connecting to NATS at {}", self.config.url);
                let mut options = async_nats::ConnectOptions::new().retry_on_initial_connect();
                if let Some(name) = &self.config.client_name {
                    options = options.name(name.as_str());
                }
                options
                    .connect(self.config.url.as_str())
                    .await
                    .context("Failed to connect to NATS")
            })
            .await
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn connect(&self) -> Result<()> {
        self.client().await.map(|_| ())
    }

    fn is_connected(&self) -> bool {
        self.client
            .get()
            .map(|client| client.connection_state() == State::Connected)
            .unwrap_or(false)
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Vec<u8>>> {
        let client = self.client().await?;
        let subscriber = client
            .subscribe(topic.to_string())
            .await
            .with_context(|| format!("Failed to subscribe to {}", topic))?;
        Ok(subscriber.map(|message| message.payload.to_vec()).boxed())
    }

    async fn unsubscribe(&self, _topic: &str) -> Result<()> {
        // The subscriber unsubscribes from the broker when its stream is dropped
        Ok(())
    }
}
