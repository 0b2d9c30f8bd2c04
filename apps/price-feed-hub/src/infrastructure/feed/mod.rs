//! Feed Adapter
//!
//! WebSocket transport, wire codec, keep-alive and the hub task that
//! drives the connection state machine.

/// JSON text-frame codec.
pub mod codec;

/// Single-transport WebSocket connection.
pub mod connection;

/// Keep-alive ping scheduling.
pub mod heartbeat;

/// Hub task and consumer handle.
pub mod service;

pub use service::{
    HubError, HubHandle, PriceHub, PriceHubConfig, SubscriptionGuard, generate_client_id,
};
