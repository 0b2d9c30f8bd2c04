#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Price Feed Hub - Real-time Price Distribution
//!
//! Maintains a single shared connection to a push-based price feed and
//! multiplexes it across any number of independent consumers, each
//! interested in its own overlapping and changing set of symbols.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types with no I/O
//!   - `symbol`: Normalized instrument identifiers
//!   - `subscription`: Refcounted subscription registry
//!   - `price`: Price updates and the latest-value store
//!   - `frame`: Feed wire frames
//!   - `reconnect`: Linear backoff policy
//!   - `status`: Connection status
//!
//! - **Application**: The hub state machine and its ports
//!   - `hub`: Sans-I/O distribution hub emitting actions
//!   - `ports`: REST quote snapshot interface
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: WebSocket connection, heartbeat and the hub task
//!   - `broadcast`: Update fan-out
//!   - `quotes`: REST snapshot client
//!   - `config`: Configuration from the environment
//!   - `health`: Health, metrics and price read HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                 ┌──────────────┐      ┌─────────────┐
//! Price feed WS ─►│   PriceHub   │─────►│ Price Store │◄── HubHandle::price
//!                 │  (one task)  │      └─────────────┘
//!  subscribe  ───►│              │      ┌─────────────┐
//!  unsubscribe───►│              │─────►│  Broadcast  │──► Consumer 1..N
//!                 └──────────────┘      └─────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core price distribution types with no I/O.
pub mod domain;

/// Application layer - Hub state machine and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::frame::{ClientFrame, FrameError, ServerMessage};
pub use domain::price::{PriceStore, PriceUpdate, PriceView, QuoteSnapshot};
pub use domain::reconnect::{ReconnectConfig, ReconnectPolicy};
pub use domain::status::ConnectionStatus;
pub use domain::subscription::{SubscriptionChanges, SubscriptionRegistry};
pub use domain::symbol::Symbol;

// Application
pub use application::hub::{HubAction, HubCore, HubSettings, HubStats};
pub use application::ports::{QuoteError, QuoteSource};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, FeedConfig, FeedSettings, QuoteSettings, ServerSettings,
    WebSocketSettings,
};

// Hub task and consumer handle
pub use infrastructure::feed::{
    HubError, HubHandle, PriceHub, PriceHubConfig, SubscriptionGuard,
};
pub use infrastructure::feed::heartbeat::HeartbeatConfig;

// Broadcast
pub use infrastructure::broadcast::{BroadcastConfig, BroadcastStats, PriceBroadcast};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// REST snapshots
pub use infrastructure::quotes::RestQuoteClient;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
