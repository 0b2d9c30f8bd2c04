//! Connection Status
//!
//! Process-wide status of the shared feed connection. Exactly one value is
//! active at any instant; it starts `Disconnected`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of the shared feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// An open attempt is in flight.
    Connecting,
    /// The transport is open.
    Connected,
    /// Not connected and no automatic attempt pending.
    #[default]
    Disconnected,
    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,
    /// The transport reported a failure.
    Error,
}

impl ConnectionStatus {
    /// Lower-case name as shown to consumers.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }

    /// Numeric encoding for the status gauge.
    #[must_use]
    pub const fn gauge_value(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Reconnecting => 3.0,
            Self::Error => 4.0,
        }
    }

    /// Check if the transport is open.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if the hub is still working towards a connection.
    #[must_use]
    pub const fn is_transitional(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
