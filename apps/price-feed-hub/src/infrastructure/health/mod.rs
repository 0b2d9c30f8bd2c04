//! Health Check, Metrics and Price Read Endpoint
//!
//! HTTP endpoint for health checks, connection status reporting, Prometheus
//! metrics and read-only access to the price store.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (feed connected)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /prices` - Every cached price keyed by symbol
//! - `GET /prices/{symbol}` - Latest price for one symbol

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::hub::HubStats;
use crate::domain::status::ConnectionStatus;
use crate::infrastructure::broadcast::BroadcastStats;
use crate::infrastructure::feed::HubHandle;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Hub version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Feed connection details.
    pub feed: FeedInfo,
    /// Subscription and store counters.
    pub hub: HubStats,
    /// Update channel statistics.
    pub broadcast: BroadcastStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed connected.
    Healthy,
    /// Feed connecting or backing off.
    Degraded,
    /// Feed down with no retry pending.
    Unhealthy,
}

impl From<ConnectionStatus> for HealthStatus {
    fn from(status: ConnectionStatus) -> Self {
        match status {
            ConnectionStatus::Connected => Self::Healthy,
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => Self::Degraded,
            ConnectionStatus::Disconnected | ConnectionStatus::Error => Self::Unhealthy,
        }
    }
}

/// Feed connection status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Client identity token.
    pub client_id: String,
    /// Connection state.
    pub state: ConnectionStatus,
    /// Whether the feed is connected.
    pub connected: bool,
}

/// Error body for failed price reads.
#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    error: String,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    hub: HubHandle,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, hub: HubHandle) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            hub,
        }
    }
}

/// Build the HTTP routes over `state`.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/prices", get(prices_handler))
        .route("/prices/{symbol}", get(price_handler))
        .with_state(state)
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
#[derive(Debug)]
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);

    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.hub.status().is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn prices_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(state.hub.prices().get_all())
}

async fn price_handler(
    State(state): State<Arc<HealthServerState>>,
    Path(symbol): Path<String>,
) -> Response {
    state.hub.price(&symbol).map_or_else(
        || {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    error: format!("no price for {}", symbol.trim().to_ascii_uppercase()),
                }),
            )
                .into_response()
        },
        |update| Json(update).into_response(),
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let connection = state.hub.status();

    HealthResponse {
        status: HealthStatus::from(connection),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed: FeedInfo {
            client_id: state.hub.client_id().to_string(),
            state: connection,
            connected: connection.is_connected(),
        },
        hub: state.hub.stats(),
        broadcast: state.hub.broadcast_stats(),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
