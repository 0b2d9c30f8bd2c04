//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Broadcast channel adapter for price update fan-out.
pub mod broadcast;

/// Configuration from environment variables.
pub mod config;

/// Price feed WebSocket adapter and hub task.
pub mod feed;

/// Health check, metrics and price read HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// REST quote snapshot client.
pub mod quotes;

/// OpenTelemetry tracing integration.
pub mod telemetry;
