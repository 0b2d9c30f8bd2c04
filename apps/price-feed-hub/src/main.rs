//! Price Feed Hub Binary
//!
//! Connects to the price feed, keeps the configured symbols subscribed and
//! serves health, metrics and the latest prices over HTTP.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-feed-hub
//! ```
//!
//! # Environment Variables
//!
//! - `PRICE_FEED_URL`: Feed base URL (default: ws://localhost:8000/ws/stocks)
//! - `PRICE_FEED_SYMBOLS`: Comma-separated symbols to keep subscribed
//! - `PRICE_FEED_HEARTBEAT_INTERVAL_SECS`: Ping interval (default: 30)
//! - `PRICE_FEED_RECONNECT_DELAY_MS`: Backoff base delay (default: 3000)
//! - `PRICE_FEED_RECONNECT_DELAY_MAX_SECS`: Backoff ceiling (default: 30)
//! - `PRICE_FEED_MAX_RECONNECT_ATTEMPTS`: Attempts before giving up (default: 5)
//! - `PRICE_FEED_UPDATES_CAPACITY`: Update channel capacity (default: 1024)
//! - `PRICE_FEED_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `QUOTE_API_URL`: REST snapshot base URL (default: <http://localhost:8000/api/v1/stocks>)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: price-feed-hub)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use price_feed_hub::infrastructure::telemetry;
use price_feed_hub::{
    FeedConfig, HealthServer, HealthServerState, HubHandle, PriceHub, PriceHubConfig,
    RestQuoteClient, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Time allowed for the hub to close the feed cleanly.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Price Feed Hub");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = FeedConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let (hub, hub_task) = PriceHub::spawn(PriceHubConfig::from_feed_config(&config))?;
    tracing::info!(client_id = hub.client_id(), "Price hub spawned");

    let _subscriptions = hub.acquire(&config.feed.symbols);

    // Seed configured symbols from REST until the feed delivers them
    match RestQuoteClient::new(&config.quotes.base_url, config.quotes.timeout) {
        Ok(quotes) => {
            let seed_hub = hub.clone();
            let symbols = config.feed.symbols.clone();
            tokio::spawn(async move {
                for symbol in symbols {
                    if let Err(e) = seed_hub.price_or_fetch(symbol.as_str(), &quotes).await {
                        tracing::warn!(%symbol, error = %e, "Quote snapshot unavailable");
                    }
                }
            });
        }
        Err(e) => tracing::warn!(error = %e, "REST quote client disabled"),
    }

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        hub.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tokio::spawn(log_updates(hub.clone(), shutdown_token.clone()));

    tracing::info!("Price feed hub ready");

    await_shutdown(shutdown_token).await;

    hub.teardown();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, hub_task).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Price hub did not stop in time"
        );
    }

    tracing::info!("Price feed hub stopped");
    Ok(())
}

/// Log each applied price update until shutdown.
async fn log_updates(hub: HubHandle, shutdown_token: CancellationToken) {
    let mut updates = hub.update_stream();

    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            update = updates.next() => {
                let Some(update) = update else { break };
                tracing::debug!(
                    symbol = %update.symbol,
                    price = %update.price,
                    change_percent = %update.change_percent,
                    "Price update"
                );
            }
        }
    }
}

fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

fn log_config(config: &FeedConfig) {
    tracing::info!(
        feed_url = %config.feed.url,
        symbols = config.feed.symbols.len(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat = ?config.websocket.heartbeat_interval,
        reconnect_base = ?config.websocket.reconnect_delay_base,
        reconnect_max = ?config.websocket.reconnect_delay_max,
        max_reconnect_attempts = config.websocket.max_reconnect_attempts,
        quote_api = %config.quotes.base_url,
        "Feed timings"
    );
}

fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
