//! Heartbeat Monitor
//!
//! Keeps proxies and load balancers from treating an idle but healthy feed
//! connection as dead. While running, the monitor becomes due one interval
//! after the last successful send; the hub answers by sending a ping.
//!
//! There is no pong deadline. Loss detection is left to the transport's
//! own close and error events.

use std::future;
use std::time::Duration;

use tokio::time::Instant;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between pings on an otherwise idle connection.
    pub ping_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with a custom interval.
    #[must_use]
    pub const fn new(ping_interval: Duration) -> Self {
        Self { ping_interval }
    }
}

/// Ping timer owned by the hub driver.
///
/// # Example
///
/// ```rust
/// use price_feed_hub::infrastructure::feed::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
///
/// # async fn example() {
/// let mut heartbeat = HeartbeatMonitor::new(HeartbeatConfig::default());
/// heartbeat.start();
///
/// // Inside the driver's select loop
/// heartbeat.due().await;
/// // ... send a ping, then
/// heartbeat.record_send();
/// # }
/// ```
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    deadline: Option<Instant>,
}

impl HeartbeatMonitor {
    /// Create a stopped monitor.
    #[must_use]
    pub const fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            deadline: None,
        }
    }

    /// Start (or restart) the timer from now.
    pub fn start(&mut self) {
        self.deadline = Some(Instant::now() + self.config.ping_interval);
    }

    /// Stop the timer.
    pub const fn stop(&mut self) {
        self.deadline = None;
    }

    /// Push the deadline back after a successful send.
    ///
    /// Has no effect while stopped.
    pub fn record_send(&mut self) {
        if self.deadline.is_some() {
            self.start();
        }
    }

    /// Check if the timer is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    /// Time at which the next ping is due.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolve when a ping is due. Never resolves while stopped.
    pub async fn due(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => future::pending().await,
        }
    }
}
