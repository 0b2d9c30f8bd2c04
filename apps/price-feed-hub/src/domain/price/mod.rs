//! Price Updates and the Price Store
//!
//! `PriceUpdate` is the immutable latest-known state of one instrument as
//! pushed by the feed. The `PriceStore` keeps at most one update per
//! symbol: the most recent by *arrival order*. The `timestamp` field is
//! advisory (server-supplied) and never used for ordering.
//!
//! `QuoteSnapshot` is the shape returned by the REST quote endpoint. It
//! converts into a `PriceUpdate` so consumers can treat a one-shot
//! snapshot and a pushed update uniformly.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::symbol::Symbol;

// =============================================================================
// Price Update
// =============================================================================

/// Latest price state for one symbol.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "price_update", "symbol": "RELIANCE", "price": 2456.30,
///  "change": 25.4, "change_percent": 1.05, "high": 2480.0, "low": 2420.0,
///  "volume": 5000000, "timestamp": "2026-01-16T23:58:00Z"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Last traded price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Absolute change versus previous close.
    #[serde(with = "rust_decimal::serde::float")]
    pub change: Decimal,
    /// Percentage change versus previous close.
    #[serde(with = "rust_decimal::serde::float")]
    pub change_percent: Decimal,
    /// Session high.
    #[serde(with = "rust_decimal::serde::float")]
    pub high: Decimal,
    /// Session low.
    #[serde(with = "rust_decimal::serde::float")]
    pub low: Decimal,
    /// Traded volume.
    #[serde(default)]
    pub volume: u64,
    /// Server-supplied time of the update (advisory only).
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Quote Snapshot (REST shape)
// =============================================================================

/// One-shot quote as returned in the `data` object of the REST quote endpoint.
///
/// The stocks API puts `last_updated` on the response envelope rather than
/// on `data`, so the field is optional here and filled in by the client.
/// `volume` is `null` when the upstream source has none.
///
/// # Wire Format (JSON)
/// ```json
/// {"symbol": "TCS", "name": "TCS", "exchange": "NSE",
///  "current_price": 3892.45, "previous_close": 0.0, "open_price": 3900.0,
///  "high": 3920.0, "low": 3870.1, "volume": null,
///  "change": -12.3, "change_percent": -0.31, "trend": "down",
///  "market_status": "open", "source": "yahoo"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Listing exchange.
    #[serde(default)]
    pub exchange: Option<String>,
    /// Current price.
    #[serde(with = "rust_decimal::serde::float")]
    pub current_price: Decimal,
    /// Absolute change versus previous close.
    #[serde(with = "rust_decimal::serde::float")]
    pub change: Decimal,
    /// Percentage change versus previous close.
    #[serde(with = "rust_decimal::serde::float")]
    pub change_percent: Decimal,
    /// Day high.
    #[serde(with = "rust_decimal::serde::float")]
    pub high: Decimal,
    /// Day low.
    #[serde(with = "rust_decimal::serde::float")]
    pub low: Decimal,
    /// Traded volume, if the source reports one.
    #[serde(default)]
    pub volume: Option<u64>,
    /// Time the quote was produced.
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl From<QuoteSnapshot> for PriceUpdate {
    fn from(quote: QuoteSnapshot) -> Self {
        Self {
            symbol: quote.symbol,
            price: quote.current_price,
            change: quote.change,
            change_percent: quote.change_percent,
            high: quote.high,
            low: quote.low,
            volume: quote.volume.unwrap_or_default(),
            timestamp: quote.last_updated.unwrap_or_else(Utc::now),
        }
    }
}

/// Parse an ISO-8601 timestamp, with or without an offset.
///
/// Naive timestamps are taken as UTC.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| raw.parse::<NaiveDateTime>().ok().map(|n| n.and_utc()))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

/// Like `deserialize_timestamp`, but `null` is accepted.
fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|raw| {
            parse_timestamp(&raw)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
        })
        .transpose()
}

// =============================================================================
// Price Store
// =============================================================================

/// Latest `PriceUpdate` per symbol.
#[derive(Debug, Default)]
pub struct PriceStore {
    prices: HashMap<Symbol, PriceUpdate>,
}

impl PriceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an update, unconditionally replacing any previous one.
    ///
    /// Returns `true` if the stored value changed.
    pub fn apply(&mut self, update: PriceUpdate) -> bool {
        match self.prices.get(&update.symbol) {
            Some(current) if *current == update => false,
            _ => {
                self.prices.insert(update.symbol.clone(), update);
                true
            }
        }
    }

    /// Store an update only if nothing is held for its symbol yet.
    ///
    /// Returns `true` if the update was stored.
    pub fn apply_if_absent(&mut self, update: PriceUpdate) -> bool {
        if self.prices.contains_key(&update.symbol) {
            return false;
        }
        self.prices.insert(update.symbol.clone(), update);
        true
    }

    /// Latest update for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &Symbol) -> Option<&PriceUpdate> {
        self.prices.get(symbol)
    }

    /// Copy of the full mapping.
    #[must_use]
    pub fn get_all(&self) -> HashMap<Symbol, PriceUpdate> {
        self.prices.clone()
    }

    /// Number of symbols with a price.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// Store shared between the hub (sole writer) and its readers.
pub type SharedPriceStore = Arc<RwLock<PriceStore>>;

// =============================================================================
// Read-only View
// =============================================================================

/// Read-only access to the price store for consumers.
///
/// Every read returns an owned copy, so a reader never observes a
/// partially applied update.
#[derive(Debug, Clone)]
pub struct PriceView {
    store: SharedPriceStore,
}

impl PriceView {
    /// Wrap a shared store.
    #[must_use]
    pub const fn new(store: SharedPriceStore) -> Self {
        Self { store }
    }

    /// Latest update for a symbol (case-insensitive).
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<PriceUpdate> {
        let symbol = Symbol::parse(symbol)?;
        self.store.read().get(&symbol).cloned()
    }

    /// Copy of all current updates.
    #[must_use]
    pub fn get_all(&self) -> HashMap<Symbol, PriceUpdate> {
        self.store.read().get_all()
    }

    /// Number of symbols with a price.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    /// Check if no price is known yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
