//! REST Quote Client
//!
//! Adapter for the `QuoteSource` port backed by the stocks REST API. Used
//! once per symbol to show a value before the first push update arrives.
//!
//! # Endpoint
//!
//! `GET {base_url}/quote/{SYMBOL}` returning
//!
//! ```json
//! {"success": true,
//!  "data": {"symbol": "TCS", "current_price": 3892.45, "volume": null, ...},
//!  "last_updated": "2026-01-16T10:15:00.123456"}
//! ```
//!
//! The envelope's `last_updated` stamps the snapshot when `data` has none.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::application::ports::{QuoteError, QuoteSource};
use chrono::{DateTime, Utc};

use crate::domain::price::{QuoteSnapshot, parse_timestamp};
use crate::domain::symbol::Symbol;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct QuoteEnvelope {
    success: bool,
    #[serde(default)]
    data: Option<QuoteSnapshot>,
    #[serde(default)]
    last_updated: Option<String>,
}

impl QuoteEnvelope {
    fn into_snapshot(self) -> Option<QuoteSnapshot> {
        if !self.success {
            return None;
        }
        let stamped: Option<DateTime<Utc>> =
            self.last_updated.as_deref().and_then(parse_timestamp);
        self.data.map(|mut quote| {
            quote.last_updated = quote.last_updated.or(stamped);
            quote
        })
    }
}

/// `QuoteSource` over HTTP.
#[derive(Debug, Clone)]
pub struct RestQuoteClient {
    client: reqwest::Client,
    base_url: String,
}

impl RestQuoteClient {
    /// Create a client for `base_url` (e.g. `http://localhost:8000/api/v1/stocks`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, QuoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QuoteError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// URL of the quote resource for a symbol.
    #[must_use]
    pub fn quote_url(&self, symbol: &Symbol) -> String {
        format!("{}/quote/{}", self.base_url, symbol)
    }
}

#[async_trait]
impl QuoteSource for RestQuoteClient {
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<QuoteSnapshot, QuoteError> {
        let url = self.quote_url(symbol);
        tracing::debug!(%symbol, url = %url, "Fetching quote snapshot");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| QuoteError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(QuoteError::Status {
                symbol: symbol.clone(),
                status: status.as_u16(),
            });
        }

        let envelope: QuoteEnvelope = response
            .json()
            .await
            .map_err(|e| QuoteError::Decode(e.to_string()))?;

        envelope
            .into_snapshot()
            .ok_or_else(|| QuoteError::Unavailable(symbol.clone()))
    }
}
