//! Feed Wire Frames
//!
//! JSON frames exchanged with the price feed server.
//!
//! # Client → Server
//!
//! ```json
//! {"type": "subscribe", "symbols": ["RELIANCE", "TCS"]}
//! {"type": "unsubscribe", "symbols": ["TCS"]}
//! {"type": "ping"}
//! {"type": "get_subscriptions"}
//! ```
//!
//! # Server → Client
//!
//! `price_update` frames carry a [`PriceUpdate`]. Every other frame type
//! (`connected`, `pong`, `subscribe_result`, `error`, ...) is opaque to the
//! hub and kept as the raw JSON value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::price::PriceUpdate;
use crate::domain::symbol::Symbol;

// =============================================================================
// Client Frames
// =============================================================================

/// Frame sent from the hub to the feed server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start receiving updates for symbols.
    Subscribe {
        /// Upper-case symbols, sorted.
        symbols: Vec<Symbol>,
    },
    /// Stop receiving updates for symbols.
    Unsubscribe {
        /// Upper-case symbols, sorted.
        symbols: Vec<Symbol>,
    },
    /// Keep-alive.
    Ping,
    /// Ask the server which symbols it holds for this client.
    GetSubscriptions,
}

impl ClientFrame {
    /// Subscribe frame with symbols in sorted order.
    #[must_use]
    pub fn subscribe(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self::Subscribe {
            symbols: sorted(symbols),
        }
    }

    /// Unsubscribe frame with symbols in sorted order.
    #[must_use]
    pub fn unsubscribe(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self::Unsubscribe {
            symbols: sorted(symbols),
        }
    }

    /// Wire name of the frame type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Ping => "ping",
            Self::GetSubscriptions => "get_subscriptions",
        }
    }
}

fn sorted(symbols: impl IntoIterator<Item = Symbol>) -> Vec<Symbol> {
    let mut symbols: Vec<Symbol> = symbols.into_iter().collect();
    symbols.sort_unstable();
    symbols.dedup();
    symbols
}

// =============================================================================
// Server Messages
// =============================================================================

/// Decoded frame received from the feed server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Latest price for a symbol.
    PriceUpdate(PriceUpdate),
    /// Any other JSON object, passed through untouched.
    Other(Value),
}

impl ServerMessage {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object, or if it claims
    /// to be a `price_update` but does not match that schema.
    pub fn from_json(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(FrameError::Json)?;

        if !value.is_object() {
            return Err(FrameError::NotAnObject);
        }

        if value.get("type").and_then(Value::as_str) == Some("price_update") {
            return serde_json::from_value(value)
                .map(Self::PriceUpdate)
                .map_err(FrameError::InvalidPriceUpdate);
        }

        Ok(Self::Other(value))
    }

    /// Value of the `type` field, if any.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::PriceUpdate(_) => Some("price_update"),
            Self::Other(value) => value.get("type").and_then(Value::as_str),
        }
    }
}

/// Reasons an inbound frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[source] serde_json::Error),
    /// Valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// A `price_update` frame with missing or mistyped fields.
    #[error("invalid price_update: {0}")]
    InvalidPriceUpdate(#[source] serde_json::Error),
}
