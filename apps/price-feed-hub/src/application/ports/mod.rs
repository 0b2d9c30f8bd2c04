//! Port Interfaces
//!
//! Contracts that infrastructure adapters implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `QuoteSource`: one-shot current quote for a symbol, used to show a
//!   value before the first push update arrives.

use async_trait::async_trait;

use crate::domain::price::QuoteSnapshot;
use crate::domain::symbol::Symbol;

/// Errors from a quote snapshot lookup.
#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    /// The requested symbol is empty after trimming.
    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),

    /// The request could not be completed.
    #[error("quote request failed: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("quote request for {symbol} returned HTTP {status}")]
    Status {
        /// Requested symbol.
        symbol: Symbol,
        /// HTTP status code.
        status: u16,
    },

    /// The response envelope reported failure or carried no data.
    #[error("no quote available for {0}")]
    Unavailable(Symbol),

    /// The response body did not match the quote shape.
    #[error("invalid quote payload: {0}")]
    Decode(String),
}

/// Source of one-shot quote snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Fetch the current quote for a symbol.
    ///
    /// # Errors
    ///
    /// Returns an error if the quote cannot be retrieved or decoded.
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<QuoteSnapshot, QuoteError>;
}
