//! Broadcast Channel Adapter
//!
//! Fans applied price updates out to any number of consumers using a tokio
//! broadcast channel. Consumers use it to re-render on change; the price
//! store stays the source of truth, so a lagging receiver only misses
//! intermediate ticks, never the latest value.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::domain::price::PriceUpdate;

/// Configuration for the update channel.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Capacity of the price update channel.
    pub price_updates_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            price_updates_capacity: 1_024,
        }
    }
}

/// Fan-out of price updates.
///
/// # Example
///
/// ```rust
/// use price_feed_hub::infrastructure::broadcast::{BroadcastConfig, PriceBroadcast};
///
/// let broadcast = PriceBroadcast::new(BroadcastConfig::default());
/// let _rx = broadcast.subscribe();
/// assert_eq!(broadcast.receiver_count(), 1);
/// ```
#[derive(Debug)]
pub struct PriceBroadcast {
    price_updates_tx: broadcast::Sender<PriceUpdate>,
}

impl PriceBroadcast {
    /// Create a new broadcast with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            price_updates_tx: broadcast::channel(config.price_updates_capacity.max(1)).0,
        }
    }

    /// Send an update to all receivers.
    ///
    /// Returns the number of receivers that got the update, or `None` if
    /// there are no active receivers.
    #[must_use]
    pub fn send(&self, update: PriceUpdate) -> Option<usize> {
        self.price_updates_tx.send(update).ok()
    }

    /// Get a new receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PriceUpdate> {
        self.price_updates_tx.subscribe()
    }

    /// Stream of updates that skips over lag instead of ending.
    #[must_use]
    pub fn stream(&self) -> Pin<Box<dyn Stream<Item = PriceUpdate> + Send>> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|item| async move {
                match item {
                    Ok(update) => Some(update),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Price update receiver lagged");
                        None
                    }
                }
            })
            .boxed()
    }

    /// Get the number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.price_updates_tx.receiver_count()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            price_update_receivers: self.receiver_count(),
        }
    }
}

/// Shared broadcast reference.
pub type SharedPriceBroadcast = Arc<PriceBroadcast>;

/// Statistics about the update channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BroadcastStats {
    /// Number of update receivers.
    pub price_update_receivers: usize,
}

// =============================================================================
// Tests
// =============================================================================
