//! Subscription Registry
//!
//! Tracks aggregate interest in symbols across any number of independent,
//! uncoordinated consumers.
//!
//! # Design
//!
//! Each symbol carries a reference count. A symbol is *active* (must be
//! subscribed on the wire) iff its count is above zero. Only transitions
//! matter to the feed:
//! - 0 → 1 makes a symbol net-new and it must be subscribed upstream
//! - 1 → 0 removes it and it must be unsubscribed upstream
//!
//! Every other increment or decrement is free. The registry is owned by
//! the distribution hub and survives reconnects; it has no visibility into
//! consumer lifecycles, so callers must pair every subscribe with an
//! unsubscribe (see `SubscriptionGuard` on the hub handle).

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::symbol::Symbol;

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to upstream subscriptions produced by a registry mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols whose refcount went 0 → 1.
    pub subscribe: BTreeSet<Symbol>,
    /// Symbols whose refcount went 1 → 0.
    pub unsubscribe: BTreeSet<Symbol>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Create changes with only subscribes.
    #[must_use]
    pub fn subscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: symbols.into_iter().collect(),
            unsubscribe: BTreeSet::new(),
        }
    }

    /// Create changes with only unsubscribes.
    #[must_use]
    pub fn unsubscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: BTreeSet::new(),
            unsubscribe: symbols.into_iter().collect(),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Reference-counted set of symbols the hub must keep subscribed.
///
/// # Example
///
/// ```rust
/// use price_feed_hub::domain::subscription::SubscriptionRegistry;
/// use price_feed_hub::domain::symbol::Symbol;
///
/// let reliance = Symbol::parse("RELIANCE").unwrap();
/// let mut registry = SubscriptionRegistry::new();
///
/// // First interest - goes on the wire
/// let changes = registry.subscribe(&[reliance.clone()]);
/// assert!(changes.subscribe.contains(&reliance));
///
/// // Second interest - refcount only
/// assert!(registry.subscribe(&[reliance.clone()]).is_empty());
///
/// // One consumer leaves - still held by the other
/// assert!(registry.unsubscribe(&[reliance.clone()]).is_empty());
///
/// // Last consumer leaves - unsubscribe upstream
/// let changes = registry.unsubscribe(&[reliance.clone()]);
/// assert!(changes.unsubscribe.contains(&reliance));
/// ```
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    refcounts: BTreeMap<Symbol, usize>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one unit of interest for each symbol.
    ///
    /// Returns the net-new symbols (refcount went 0 → 1).
    pub fn subscribe(&mut self, symbols: &[Symbol]) -> SubscriptionChanges {
        let mut net_new = Vec::new();

        for symbol in symbols {
            let refcount = self.refcounts.entry(symbol.clone()).or_insert(0);
            *refcount += 1;

            if *refcount == 1 {
                net_new.push(symbol.clone());
            }
        }

        SubscriptionChanges::subscribe_only(net_new)
    }

    /// Remove one unit of interest for each symbol.
    ///
    /// Unknown symbols are ignored (refcount floors at zero). Returns the
    /// symbols that left the active set (refcount went 1 → 0).
    pub fn unsubscribe(&mut self, symbols: &[Symbol]) -> SubscriptionChanges {
        let mut removed = Vec::new();

        for symbol in symbols {
            let Some(refcount) = self.refcounts.get_mut(symbol) else {
                continue;
            };

            *refcount = refcount.saturating_sub(1);

            if *refcount == 0 {
                self.refcounts.remove(symbol);
                removed.push(symbol.clone());
            }
        }

        SubscriptionChanges::unsubscribe_only(removed)
    }

    /// The full active-symbol set, sorted.
    #[must_use]
    pub fn snapshot_active(&self) -> Vec<Symbol> {
        self.refcounts.keys().cloned().collect()
    }

    /// Current refcount for a symbol (0 when inactive).
    #[must_use]
    pub fn refcount(&self, symbol: &Symbol) -> usize {
        self.refcounts.get(symbol).copied().unwrap_or(0)
    }

    /// Check whether a symbol is active.
    #[must_use]
    pub fn is_active(&self, symbol: &Symbol) -> bool {
        self.refcounts.contains_key(symbol)
    }

    /// Number of active symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.refcounts.len()
    }

    /// Check if no symbol is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refcounts.is_empty()
    }

    /// Sum of all refcounts.
    #[must_use]
    pub fn total_interest(&self) -> usize {
        self.refcounts.values().sum()
    }

    /// Drop all interest. Used on teardown.
    pub fn clear(&mut self) {
        self.refcounts.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
