//! Prometheus Metrics Module
//!
//! Exposes hub metrics in Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Counts of frames received, dropped and sent by type
//! - **Connection**: Feed connection status and reconnect attempts
//! - **Subscriptions**: Active symbol and cached price counts
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before `init_metrics` has run is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::status::ConnectionStatus;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "price_hub_frames_received_total",
        "Total frames received from the price feed by type"
    );
    describe_counter!(
        "price_hub_frames_dropped_total",
        "Total inbound frames dropped as malformed"
    );
    describe_counter!(
        "price_hub_frames_sent_total",
        "Total frames sent to the price feed by type"
    );
    describe_counter!(
        "price_hub_reconnects_total",
        "Total scheduled reconnection attempts"
    );

    describe_gauge!(
        "price_hub_connection_status",
        "Feed connection status (0=disconnected 1=connecting 2=connected 3=reconnecting 4=error)"
    );
    describe_gauge!(
        "price_hub_active_symbols",
        "Symbols with at least one interested consumer"
    );
    describe_gauge!(
        "price_hub_cached_prices",
        "Symbols with a known latest price"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame received from the feed.
pub fn record_frame_received(kind: &str) {
    counter!(
        "price_hub_frames_received_total",
        "type" => kind.to_string()
    )
    .increment(1);
}

/// Record a dropped inbound frame.
pub fn record_frame_dropped() {
    counter!("price_hub_frames_dropped_total").increment(1);
}

/// Record a frame sent to the feed.
pub fn record_frame_sent(kind: &'static str) {
    counter!(
        "price_hub_frames_sent_total",
        "type" => kind
    )
    .increment(1);
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect() {
    counter!("price_hub_reconnects_total").increment(1);
}

/// Update the connection status gauge.
pub fn set_connection_status(status: ConnectionStatus) {
    gauge!("price_hub_connection_status").set(status.gauge_value());
}

/// Update the active symbol gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_symbols(count: usize) {
    gauge!("price_hub_active_symbols").set(count as f64);
}

/// Update the cached price gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_cached_prices(count: usize) {
    gauge!("price_hub_cached_prices").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received("price_update");
        record_frame_dropped();
        record_frame_sent("ping");
        record_reconnect();
        set_connection_status(ConnectionStatus::Connected);
        set_active_symbols(3);
        set_cached_prices(2);
    }

    #[test]
    fn handle_absent_before_init() {
        // Unit tests never install the global recorder
        assert!(get_metrics_handle().is_none());
    }
}
