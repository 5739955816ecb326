use anyhow::{Context, Result};
use plant_sync::api::create_router;
use plant_sync::channel::NatsTransport;
use plant_sync::config::{load_config, SyncConfig};
use plant_sync::notifier::LogNotifier;
use plant_sync::service::ServiceClient;
use plant_sync::session::{SessionDeps, SyncSession};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plant_sync=info".into()),
        )
        .init();

    info!("plant-sync starting...");

    let config_path =
        std::env::var("PLANT_SYNC_CONFIG").unwrap_or_else(|_| "plant-sync.toml".to_string());
    let mut config = if Path::new(&config_path).exists() {
        load_config(&config_path)?
    } else {
        info!(path = %config_path, "Config file not found, using defaults");
        SyncConfig::default()
    };
    config.apply_env_overrides();

    info!(
        subject_id = ?config.session.subject_id,
        service_url = %config.service.base_url,
        nats_url = %config.channel.nats.url,
        namespace = %config.channel.namespace,
        "Configuration loaded"
    );

    let service = Arc::new(ServiceClient::new(&config.service)?);
    let deps = SessionDeps {
        sensor_source: service.clone(),
        prediction_service: service,
        transport: Arc::new(NatsTransport::new(config.channel.nats.clone())),
        notifier: Some(Arc::new(LogNotifier)),
    };
    let session = Arc::new(SyncSession::new(&config, deps));

    if let Err(e) = session.connect_channel().await {
        warn!(error = %e, "Event channel unavailable at startup; will retry");
    }
    if session.start_polling() {
        info!("Polling started");
    }

    // Re-establish subscriptions lost to connection drops
    let watchdog = {
        let session = Arc::clone(&session);
        let period = Duration::from_secs(config.channel.resubscribe_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !session.channel_connected() {
                    continue;
                }
                match session.resubscribe().await {
                    Ok(0) => {}
                    Ok(added) => info!(topics = added, "Resubscribed"),
                    Err(e) => debug!(error = %e, "Resubscribe attempt failed"),
                }
            }
        })
    };

    let router = create_router(Arc::clone(&session)).layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(&config.api.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.api.bind_addr))?;
    info!(addr = %config.api.bind_addr, "API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    info!("Shutdown signal received");
    watchdog.abort();
    session.dispose().await;
    info!("plant-sync stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl_c signal");
    }
}
