//! Instrument Symbols
//!
//! A `Symbol` is the normalized identifier of a tradable instrument. Input
//! is case-insensitive and surrounding whitespace is ignored; the stored
//! form is always upper-case, so `"reliance"`, `" Reliance "` and
//! `"RELIANCE"` all key the same registry and price store entries.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Normalized instrument identifier (upper-case, trimmed, non-empty).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Normalize raw input into a symbol.
    ///
    /// Returns `None` when the input is empty after trimming.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_uppercase()))
    }

    /// Normalize a batch of raw symbols, dropping empty entries.
    ///
    /// Duplicates that differ only by case collapse into one entry; the
    /// result is sorted.
    pub fn parse_all<I, S>(raw: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut symbols: Vec<Self> = raw
            .into_iter()
            .filter_map(|s| {
                let parsed = Self::parse(s.as_ref());
                if parsed.is_none() {
                    tracing::debug!(raw = s.as_ref(), "Ignoring empty symbol");
                }
                parsed
            })
            .collect();
        symbols.sort_unstable();
        symbols.dedup();
        symbols
    }

    /// The normalized symbol text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).ok_or_else(|| serde::de::Error::custom("symbol cannot be empty"))
    }
}
