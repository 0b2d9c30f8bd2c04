//! Configuration Module
//!
//! Configuration loading for the price feed hub.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, FeedConfig, FeedSettings, QuoteSettings, ServerSettings,
    WebSocketSettings,
};
