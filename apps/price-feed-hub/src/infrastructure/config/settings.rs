//! Hub Configuration Settings
//!
//! Configuration types for the price feed hub, loaded from environment
//! variables. Unparseable numeric values fall back to their defaults.

use std::time::Duration;

use crate::domain::symbol::Symbol;

/// Price feed endpoint settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Feed base URL (`ws://` or `wss://`); the client id is appended.
    pub url: String,
    /// Symbols subscribed at startup.
    pub symbols: Vec<Symbol>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws/stocks".to_string(),
            symbols: Vec::new(),
        }
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Ping interval while connected.
    pub heartbeat_interval: Duration,
    /// Backoff unit; attempt n waits n times this.
    pub reconnect_delay_base: Duration,
    /// Backoff ceiling.
    pub reconnect_delay_max: Duration,
    /// Attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay_base: Duration::from_millis(3_000),
            reconnect_delay_max: Duration::from_secs(30),
            max_reconnect_attempts: 5,
        }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Capacity of the price update channel.
    pub price_updates_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            price_updates_capacity: 1_024,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check and price read HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// REST quote snapshot settings.
#[derive(Debug, Clone)]
pub struct QuoteSettings {
    /// Base URL of the stocks REST API.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for QuoteSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1/stocks".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone, Default)]
pub struct FeedConfig {
    /// Feed endpoint.
    pub feed: FeedSettings,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Broadcast channel settings.
    pub broadcast: BroadcastSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// REST quote settings.
    pub quotes: QuoteSettings,
}

impl FeedConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL is empty or has the wrong scheme.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL is empty or has the wrong scheme.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let url = env
            .string("PRICE_FEED_URL")
            .unwrap_or_else(|| FeedSettings::default().url);
        validate_url("PRICE_FEED_URL", &url, &["ws://", "wss://"])?;

        let symbols = env
            .string("PRICE_FEED_SYMBOLS")
            .map(|raw| Symbol::parse_all(raw.split(',')))
            .unwrap_or_default();

        let websocket = WebSocketSettings {
            heartbeat_interval: env.duration_secs(
                "PRICE_FEED_HEARTBEAT_INTERVAL_SECS",
                WebSocketSettings::default().heartbeat_interval,
            ),
            reconnect_delay_base: env.duration_millis(
                "PRICE_FEED_RECONNECT_DELAY_MS",
                WebSocketSettings::default().reconnect_delay_base,
            ),
            reconnect_delay_max: env.duration_secs(
                "PRICE_FEED_RECONNECT_DELAY_MAX_SECS",
                WebSocketSettings::default().reconnect_delay_max,
            ),
            max_reconnect_attempts: env.parse(
                "PRICE_FEED_MAX_RECONNECT_ATTEMPTS",
                WebSocketSettings::default().max_reconnect_attempts,
            ),
        };

        let broadcast = BroadcastSettings {
            price_updates_capacity: env.parse(
                "PRICE_FEED_UPDATES_CAPACITY",
                BroadcastSettings::default().price_updates_capacity,
            ),
        };

        let server = ServerSettings {
            health_port: env.parse(
                "PRICE_FEED_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let quote_url = env
            .string("QUOTE_API_URL")
            .unwrap_or_else(|| QuoteSettings::default().base_url);
        validate_url("QUOTE_API_URL", &quote_url, &["http://", "https://"])?;

        Ok(Self {
            feed: FeedSettings { url, symbols },
            websocket,
            broadcast,
            server,
            quotes: QuoteSettings {
                base_url: quote_url,
                ..QuoteSettings::default()
            },
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// URL does not use an accepted scheme.
    #[error("environment variable {key} has unsupported URL {value:?}")]
    InvalidUrl {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

fn validate_url(key: &str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }

    let host = schemes
        .iter()
        .find_map(|scheme| value.strip_prefix(scheme));

    match host {
        Some(rest) if !rest.is_empty() && !rest.starts_with('/') => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
