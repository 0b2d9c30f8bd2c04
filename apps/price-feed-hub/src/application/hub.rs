//! Distribution Hub State Machine
//!
//! The hub composes the subscription registry, the price store and the
//! reconnect policy into the consumer contract. It performs no I/O: every
//! event (transport, timer, consumer call) goes in through a method and
//! comes back out as a list of [`HubAction`]s for the driver to carry out.
//! This keeps every wire-level guarantee checkable without a socket.
//!
//! # Link Lifecycle
//!
//! ```text
//!            start / reconnect()
//!   Idle ───────────────► Opening ──opened──► Open
//!                           ▲  │                │
//!              retry timer  │  │ closed         │ closed (unexpected)
//!                           │  ▼                ▼
//!                         Backoff ◄─────────────┘
//!                           │
//!                           │ attempts exhausted / clean close
//!                           ▼
//!                        Stopped ──reconnect()──► Opening
//!
//!   teardown() from any phase ──► TornDown (terminal)
//! ```
//!
//! # Stale Events
//!
//! Every open attempt gets a fresh *epoch* and every retry timer a fresh
//! *generation*. Transport events carrying an old epoch and timer expiries
//! carrying an old generation are ignored, so at most one transport and
//! one retry timer are ever live.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::domain::frame::{ClientFrame, ServerMessage};
use crate::domain::price::{PriceUpdate, SharedPriceStore};
use crate::domain::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::domain::status::ConnectionStatus;
use crate::domain::subscription::SubscriptionRegistry;
use crate::domain::symbol::Symbol;

// =============================================================================
// Actions
// =============================================================================

/// Side effect requested by the hub state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum HubAction {
    /// Open a new transport to `url`, tagging its events with `epoch`.
    Open {
        /// Epoch of the attempt.
        epoch: u64,
        /// Full endpoint including the client id segment.
        url: String,
    },
    /// Send a frame on the current transport.
    Send(ClientFrame),
    /// Close the current transport cleanly.
    Close,
    /// Start (or restart) the keep-alive timer.
    StartHeartbeat,
    /// Stop the keep-alive timer.
    StopHeartbeat,
    /// Arm the retry timer, replacing any existing one.
    ScheduleRetry {
        /// How long to wait.
        delay: Duration,
        /// Generation to report back on expiry.
        generation: u64,
    },
    /// Disarm the retry timer.
    CancelRetry,
    /// A price update was stored and should be fanned out.
    Broadcast(PriceUpdate),
    /// An opaque server message became the new `last_message`.
    Forward(Value),
    /// An inbound frame was dropped.
    Discarded {
        /// Why decoding failed.
        reason: String,
    },
}

// =============================================================================
// Link Phase
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkPhase {
    Idle,
    Opening { epoch: u64 },
    Open { epoch: u64 },
    Backoff { generation: u64 },
    Stopped,
    TornDown,
}

// =============================================================================
// Settings and Stats
// =============================================================================

/// Static settings of a hub instance.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Feed base URL; the client id is appended as the final segment.
    pub feed_url: String,
    /// Client identity token, stable for the hub's lifetime.
    pub client_id: String,
    /// Backoff for unexpected closes.
    pub reconnect: ReconnectConfig,
}

impl HubSettings {
    /// Endpoint with the client id as the final path segment.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.feed_url.trim_end_matches('/'), self.client_id)
    }
}

/// Counters describing the hub.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Symbols with a refcount above zero.
    pub active_symbols: usize,
    /// Sum of all refcounts.
    pub total_interest: usize,
    /// Symbols with a known price.
    pub cached_prices: usize,
    /// Consecutive reconnect attempts since the last successful open.
    pub reconnect_attempts: u32,
    /// Inbound text frames seen.
    pub frames_received: u64,
    /// Inbound frames dropped as malformed.
    pub frames_dropped: u64,
    /// Most recent transport error, cleared on a successful open.
    pub last_error: Option<String>,
}

// =============================================================================
// Hub Core
// =============================================================================

/// Sans-I/O distribution hub.
///
/// The single writer of the registry and the price store.
#[derive(Debug)]
pub struct HubCore {
    endpoint: String,
    registry: SubscriptionRegistry,
    store: SharedPriceStore,
    policy: ReconnectPolicy,
    phase: LinkPhase,
    status: ConnectionStatus,
    epoch: u64,
    generation: u64,
    last_error: Option<String>,
    last_message: Option<Value>,
    frames_received: u64,
    frames_dropped: u64,
}

impl HubCore {
    /// Create an idle hub writing into `store`.
    #[must_use]
    pub fn new(settings: &HubSettings, store: SharedPriceStore) -> Self {
        Self {
            endpoint: settings.endpoint(),
            registry: SubscriptionRegistry::new(),
            store,
            policy: ReconnectPolicy::new(settings.reconnect.clone()),
            phase: LinkPhase::Idle,
            status: ConnectionStatus::Disconnected,
            epoch: 0,
            generation: 0,
            last_error: None,
            last_message: None,
            frames_received: 0,
            frames_dropped: 0,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current connection status.
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Last opaque (non-price) server message.
    #[must_use]
    pub const fn last_message(&self) -> Option<&Value> {
        self.last_message.as_ref()
    }

    /// The subscription registry.
    #[must_use]
    pub const fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Full endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Check if `teardown` has run.
    #[must_use]
    pub const fn is_torn_down(&self) -> bool {
        matches!(self.phase, LinkPhase::TornDown)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            active_symbols: self.registry.len(),
            total_interest: self.registry.total_interest(),
            cached_prices: self.store.read().len(),
            reconnect_attempts: self.policy.attempt_count(),
            frames_received: self.frames_received,
            frames_dropped: self.frames_dropped,
            last_error: self.last_error.clone(),
        }
    }

    const fn is_open(&self) -> bool {
        matches!(self.phase, LinkPhase::Open { .. })
    }

    const fn is_current(&self, epoch: u64) -> bool {
        match self.phase {
            LinkPhase::Opening { epoch: current } | LinkPhase::Open { epoch: current } => {
                current == epoch
            }
            _ => false,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Begin the first connection attempt. Only acts on an idle hub.
    pub fn start(&mut self) -> Vec<HubAction> {
        if self.phase != LinkPhase::Idle {
            return Vec::new();
        }
        vec![self.begin_attempt()]
    }

    /// Force a fresh attempt cycle with the attempt count reset to zero.
    ///
    /// Ignored after teardown.
    pub fn reconnect(&mut self) -> Vec<HubAction> {
        let mut actions = Vec::new();

        match self.phase {
            LinkPhase::TornDown => return actions,
            LinkPhase::Backoff { .. } => actions.push(HubAction::CancelRetry),
            LinkPhase::Opening { .. } | LinkPhase::Open { .. } => {
                actions.push(HubAction::StopHeartbeat);
                actions.push(HubAction::Close);
            }
            LinkPhase::Idle | LinkPhase::Stopped => {}
        }

        tracing::info!(endpoint = %self.endpoint, "Manual reconnect requested");
        self.policy.reset();
        actions.push(self.begin_attempt());
        actions
    }

    /// Stop all timers, close the transport cleanly and clear the registry.
    ///
    /// Idempotent: a second call returns no actions.
    pub fn teardown(&mut self) -> Vec<HubAction> {
        if self.is_torn_down() {
            return Vec::new();
        }

        tracing::info!(
            active_symbols = self.registry.len(),
            "Tearing down price hub"
        );

        self.phase = LinkPhase::TornDown;
        self.status = ConnectionStatus::Disconnected;
        self.registry.clear();

        vec![
            HubAction::CancelRetry,
            HubAction::StopHeartbeat,
            HubAction::Close,
        ]
    }

    fn begin_attempt(&mut self) -> HubAction {
        self.epoch += 1;
        self.phase = LinkPhase::Opening { epoch: self.epoch };
        self.status = ConnectionStatus::Connecting;

        tracing::debug!(epoch = self.epoch, endpoint = %self.endpoint, "Opening feed connection");

        HubAction::Open {
            epoch: self.epoch,
            url: self.endpoint.clone(),
        }
    }

    // =========================================================================
    // Transport Events
    // =========================================================================

    /// The transport for `epoch` is open.
    pub fn on_opened(&mut self, epoch: u64) -> Vec<HubAction> {
        if self.phase != (LinkPhase::Opening { epoch }) {
            return Vec::new();
        }

        self.policy.reset();
        self.phase = LinkPhase::Open { epoch };
        self.status = ConnectionStatus::Connected;
        self.last_error = None;

        let active = self.registry.snapshot_active();
        tracing::info!(
            epoch,
            resubscribe = active.len(),
            "Price feed connected"
        );

        let mut actions = Vec::with_capacity(2);
        if !active.is_empty() {
            actions.push(HubAction::Send(ClientFrame::subscribe(active)));
        }
        actions.push(HubAction::StartHeartbeat);
        actions
    }

    /// A text frame arrived on the transport for `epoch`.
    ///
    /// Malformed frames are dropped without touching the status.
    pub fn on_message(&mut self, epoch: u64, text: &str) -> Vec<HubAction> {
        if self.phase != (LinkPhase::Open { epoch }) {
            return Vec::new();
        }

        self.frames_received += 1;

        match ServerMessage::from_json(text) {
            Ok(ServerMessage::PriceUpdate(update)) => {
                if self.store.write().apply(update.clone()) {
                    vec![HubAction::Broadcast(update)]
                } else {
                    Vec::new()
                }
            }
            Ok(ServerMessage::Other(value)) => {
                log_notice(&value);
                self.last_message = Some(value.clone());
                vec![HubAction::Forward(value)]
            }
            Err(e) => {
                self.frames_dropped += 1;
                tracing::debug!(error = %e, "Dropping malformed feed frame");
                vec![HubAction::Discarded {
                    reason: e.to_string(),
                }]
            }
        }
    }

    /// The transport for `epoch` reported an error.
    ///
    /// A `closed` event is expected to follow and drives the retry.
    pub fn on_transport_error(&mut self, epoch: u64, message: &str) -> Vec<HubAction> {
        if !self.is_current(epoch) {
            return Vec::new();
        }

        tracing::warn!(epoch, error = message, "Price feed transport error");
        self.status = ConnectionStatus::Error;
        self.last_error = Some(message.to_string());
        Vec::new()
    }

    /// The transport for `epoch` closed.
    pub fn on_closed(&mut self, epoch: u64, clean: bool) -> Vec<HubAction> {
        if !self.is_current(epoch) {
            return Vec::new();
        }

        let mut actions = vec![HubAction::StopHeartbeat];

        if clean {
            tracing::info!(epoch, "Price feed closed cleanly");
            self.enter_stopped();
            return actions;
        }

        match self.policy.next_delay() {
            Some(delay) => {
                self.generation += 1;
                self.phase = LinkPhase::Backoff {
                    generation: self.generation,
                };
                self.status = ConnectionStatus::Reconnecting;

                tracing::info!(
                    attempt = self.policy.attempt_count(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Scheduling price feed reconnect"
                );

                actions.push(HubAction::ScheduleRetry {
                    delay,
                    generation: self.generation,
                });
            }
            None => {
                tracing::warn!(
                    attempts = self.policy.attempt_count(),
                    "Reconnect attempts exhausted, prices may be stale"
                );
                self.enter_stopped();
            }
        }

        actions
    }

    /// The retry timer armed with `generation` fired.
    pub fn retry_elapsed(&mut self, generation: u64) -> Vec<HubAction> {
        if self.phase != (LinkPhase::Backoff { generation }) {
            return Vec::new();
        }
        vec![self.begin_attempt()]
    }

    /// The keep-alive interval elapsed.
    pub fn heartbeat_due(&self) -> Vec<HubAction> {
        if self.is_open() {
            vec![HubAction::Send(ClientFrame::Ping)]
        } else {
            Vec::new()
        }
    }

    fn enter_stopped(&mut self) {
        self.phase = LinkPhase::Stopped;
        self.status = ConnectionStatus::Disconnected;
    }

    // =========================================================================
    // Consumer Calls
    // =========================================================================

    /// Add one unit of interest per symbol.
    ///
    /// Emits one subscribe frame for the net-new set while open.
    pub fn subscribe(&mut self, symbols: &[Symbol]) -> Vec<HubAction> {
        if self.is_torn_down() || symbols.is_empty() {
            return Vec::new();
        }

        let changes = self.registry.subscribe(symbols);
        if changes.subscribe.is_empty() || !self.is_open() {
            return Vec::new();
        }

        vec![HubAction::Send(ClientFrame::subscribe(changes.subscribe))]
    }

    /// Remove one unit of interest per symbol.
    ///
    /// Emits one unsubscribe frame for the symbols that left the active
    /// set while open.
    pub fn unsubscribe(&mut self, symbols: &[Symbol]) -> Vec<HubAction> {
        if self.is_torn_down() || symbols.is_empty() {
            return Vec::new();
        }

        let changes = self.registry.unsubscribe(symbols);
        if changes.unsubscribe.is_empty() || !self.is_open() {
            return Vec::new();
        }

        vec![HubAction::Send(ClientFrame::unsubscribe(
            changes.unsubscribe,
        ))]
    }

    /// Store a snapshot price unless the symbol already has one.
    pub fn seed_if_absent(&mut self, update: PriceUpdate) -> Vec<HubAction> {
        if self.store.write().apply_if_absent(update.clone()) {
            vec![HubAction::Broadcast(update)]
        } else {
            Vec::new()
        }
    }

    /// Ask the server to report its subscriptions for this client.
    pub fn request_server_subscriptions(&self) -> Vec<HubAction> {
        if self.is_open() {
            vec![HubAction::Send(ClientFrame::GetSubscriptions)]
        } else {
            Vec::new()
        }
    }
}

fn log_notice(value: &Value) {
    let field = |key: &str| value.get(key).and_then(Value::as_str);

    match field("type") {
        Some("connected") => {
            let client_id = field("client_id");
            let max_subscriptions = value.get("max_subscriptions").and_then(Value::as_u64);
            tracing::info!(
                client_id,
                max_subscriptions,
                "Feed server acknowledged connection"
            );
        }
        Some("error") => {
            let detail = field("message");
            tracing::warn!(detail, "Feed server reported an error");
        }
        kind => tracing::trace!(kind, "Feed server message"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::RwLock;
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::domain::price::PriceStore;

    const BASE: Duration = Duration::from_millis(3_000);

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn settings() -> HubSettings {
        HubSettings {
            feed_url: "ws://feed.test/ws/stocks/".to_string(),
            client_id: "client-1".to_string(),
            reconnect: ReconnectConfig::new(BASE, Duration::from_secs(30), 0.0, 5),
        }
    }

    fn new_hub() -> HubCore {
        HubCore::new(&settings(), Arc::new(RwLock::new(PriceStore::new())))
    }

    /// Start and open; returns the live epoch.
    fn connect(hub: &mut HubCore) -> u64 {
        let actions = hub.start();
        let [HubAction::Open { epoch, .. }] = actions.as_slice() else {
            panic!("expected open, got {actions:?}");
        };
        let epoch = *epoch;
        hub.on_opened(epoch);
        epoch
    }

    fn open_epoch(actions: &[HubAction]) -> u64 {
        actions
            .iter()
            .find_map(|a| match a {
                HubAction::Open { epoch, .. } => Some(*epoch),
                _ => None,
            })
            .expect("open action")
    }

    fn retry_of(actions: &[HubAction]) -> (Duration, u64) {
        actions
            .iter()
            .find_map(|a| match a {
                HubAction::ScheduleRetry { delay, generation } => Some((*delay, *generation)),
                _ => None,
            })
            .expect("retry action")
    }

    fn sent(actions: &[HubAction]) -> Vec<ClientFrame> {
        actions
            .iter()
            .filter_map(|a| match a {
                HubAction::Send(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    fn price_frame(symbol: &str, price: f64) -> String {
        json!({
            "type": "price_update",
            "symbol": symbol,
            "price": price,
            "change": 1.5,
            "change_percent": 0.2,
            "high": price + 10.0,
            "low": price - 10.0,
            "volume": 1000,
            "timestamp": "2026-01-16T10:00:00Z"
        })
        .to_string()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    #[test]
    fn starts_disconnected_then_connecting() {
        let mut hub = new_hub();
        assert_eq!(hub.status(), ConnectionStatus::Disconnected);

        let actions = hub.start();

        assert_eq!(hub.status(), ConnectionStatus::Connecting);
        assert_eq!(
            actions,
            vec![HubAction::Open {
                epoch: 1,
                url: "ws://feed.test/ws/stocks/client-1".to_string()
            }]
        );
        assert!(hub.start().is_empty());
    }

    #[test]
    fn open_with_empty_registry_only_starts_heartbeat() {
        let mut hub = new_hub();
        let epoch = open_epoch(&hub.start());

        let actions = hub.on_opened(epoch);

        assert_eq!(actions, vec![HubAction::StartHeartbeat]);
        assert_eq!(hub.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn subscriptions_before_open_are_replayed_once() {
        let mut hub = new_hub();
        let epoch = open_epoch(&hub.start());

        assert!(hub.subscribe(&[sym("TCS"), sym("RELIANCE")]).is_empty());
        assert!(hub.subscribe(&[sym("INFY")]).is_empty());

        let actions = hub.on_opened(epoch);

        assert_eq!(
            actions,
            vec![
                HubAction::Send(ClientFrame::subscribe([
                    sym("INFY"),
                    sym("RELIANCE"),
                    sym("TCS")
                ])),
                HubAction::StartHeartbeat,
            ]
        );
    }

    // -------------------------------------------------------------------------
    // Refcounted subscriptions
    // -------------------------------------------------------------------------

    #[test]
    fn shared_symbol_unsubscribed_only_by_last_holder() {
        let mut hub = new_hub();
        connect(&mut hub);

        // A: {RELIANCE}
        let a = hub.subscribe(&[sym("RELIANCE")]);
        assert_eq!(sent(&a), vec![ClientFrame::subscribe([sym("RELIANCE")])]);

        // B: {RELIANCE, TCS} - only TCS is net-new
        let b = hub.subscribe(&[sym("RELIANCE"), sym("TCS")]);
        assert_eq!(sent(&b), vec![ClientFrame::subscribe([sym("TCS")])]);

        // A leaves - RELIANCE still held by B
        assert!(hub.unsubscribe(&[sym("RELIANCE")]).is_empty());

        // B leaves RELIANCE
        let b_leaves = hub.unsubscribe(&[sym("RELIANCE")]);
        assert_eq!(
            sent(&b_leaves),
            vec![ClientFrame::unsubscribe([sym("RELIANCE")])]
        );
    }

    #[test]
    fn one_frame_per_call_not_per_symbol() {
        let mut hub = new_hub();
        connect(&mut hub);

        let actions = hub.subscribe(&[sym("A"), sym("B"), sym("C")]);

        assert_eq!(
            sent(&actions),
            vec![ClientFrame::subscribe([sym("A"), sym("B"), sym("C")])]
        );
    }

    #[test]
    fn unsubscribe_without_subscribe_is_noop() {
        let mut hub = new_hub();
        connect(&mut hub);

        assert!(hub.unsubscribe(&[sym("RELIANCE")]).is_empty());
        assert_eq!(hub.status(), ConnectionStatus::Connected);
        assert_eq!(hub.registry().refcount(&sym("RELIANCE")), 0);
    }

    #[test]
    fn changes_while_disconnected_send_nothing() {
        let mut hub = new_hub();
        let epoch = connect(&mut hub);
        hub.subscribe(&[sym("TCS")]);
        hub.on_closed(epoch, false);

        assert!(hub.subscribe(&[sym("INFY")]).is_empty());
        assert!(hub.unsubscribe(&[sym("TCS")]).is_empty());
        assert_eq!(hub.registry().snapshot_active(), vec![sym("INFY")]);
    }

    // -------------------------------------------------------------------------
    // Reconnect
    // -------------------------------------------------------------------------

    #[test]
    fn reconnect_resends_full_active_set_as_single_frame() {
        let mut hub = new_hub();
        let epoch = connect(&mut hub);
        hub.subscribe(&[sym("RELIANCE"), sym("TCS")]);
        hub.subscribe(&[sym("INFY")]);
        hub.subscribe(&[sym("SBIN")]);
        hub.unsubscribe(&[sym("SBIN")]);

        let closed = hub.on_closed(epoch, false);
        let (_, generation) = retry_of(&closed);
        let next = open_epoch(&hub.retry_elapsed(generation));
        let reopened = hub.on_opened(next);

        assert_eq!(
            sent(&reopened),
            vec![ClientFrame::subscribe([
                sym("INFY"),
                sym("RELIANCE"),
                sym("TCS")
            ])]
        );
    }

    #[test]
    fn unexpected_close_backs_off_linearly() {
        let mut hub = new_hub();

        // Two successful opens before the outage
        let first = connect(&mut hub);
        let (_, generation) = retry_of(&hub.on_closed(first, false));
        let second = open_epoch(&hub.retry_elapsed(generation));
        hub.on_opened(second);

        let closed = hub.on_closed(second, false);
        assert_eq!(hub.status(), ConnectionStatus::Reconnecting);
        let (delay, generation) = retry_of(&closed);
        assert_eq!(delay, BASE);
        assert!(closed.contains(&HubAction::StopHeartbeat));

        // Attempt 1 fails to open
        let third = open_epoch(&hub.retry_elapsed(generation));
        let (delay, _) = retry_of(&hub.on_closed(third, false));
        assert_eq!(delay, BASE * 2);
        assert_eq!(hub.stats().reconnect_attempts, 2);
    }

    #[test]
    fn backoff_is_capped() {
        let mut hub = HubCore::new(
            &HubSettings {
                reconnect: ReconnectConfig::new(
                    Duration::from_secs(20),
                    Duration::from_secs(30),
                    0.0,
                    5,
                ),
                ..settings()
            },
            Arc::new(RwLock::new(PriceStore::new())),
        );
        let epoch = connect(&mut hub);

        let (_, generation) = retry_of(&hub.on_closed(epoch, false));
        let next = open_epoch(&hub.retry_elapsed(generation));
        let (delay, _) = retry_of(&hub.on_closed(next, false));

        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn exhausting_attempts_is_terminal() {
        let mut hub = new_hub();
        let mut epoch = connect(&mut hub);

        for _ in 0..5 {
            let (_, generation) = retry_of(&hub.on_closed(epoch, false));
            epoch = open_epoch(&hub.retry_elapsed(generation));
        }

        let actions = hub.on_closed(epoch, false);

        assert_eq!(actions, vec![HubAction::StopHeartbeat]);
        assert_eq!(hub.status(), ConnectionStatus::Disconnected);
        assert!(hub.retry_elapsed(5).is_empty());
    }

    #[test]
    fn successful_open_resets_attempts() {
        let mut hub = new_hub();
        let mut epoch = connect(&mut hub);

        // A flapping link: 4 failures then a success, repeated
        for _ in 0..3 {
            for _ in 0..4 {
                let (_, generation) = retry_of(&hub.on_closed(epoch, false));
                epoch = open_epoch(&hub.retry_elapsed(generation));
            }
            hub.on_opened(epoch);
            assert_eq!(hub.stats().reconnect_attempts, 0);
        }

        let (delay, _) = retry_of(&hub.on_closed(epoch, false));
        assert_eq!(delay, BASE);
    }

    #[test]
    fn clean_close_does_not_retry() {
        let mut hub = new_hub();
        let epoch = connect(&mut hub);

        let actions = hub.on_closed(epoch, true);

        assert_eq!(actions, vec![HubAction::StopHeartbeat]);
        assert_eq!(hub.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn transport_error_sets_error_then_retries() {
        let mut hub = new_hub();
        let epoch = open_epoch(&hub.start());

        hub.on_transport_error(epoch, "connection refused");
        assert_eq!(hub.status(), ConnectionStatus::Error);
        assert_eq!(
            hub.stats().last_error.as_deref(),
            Some("connection refused")
        );

        let actions = hub.on_closed(epoch, false);
        assert_eq!(retry_of(&actions).0, BASE);
        assert_eq!(hub.status(), ConnectionStatus::Reconnecting);

        let next = open_epoch(&hub.retry_elapsed(retry_of(&actions).1));
        hub.on_opened(next);
        assert!(hub.stats().last_error.is_none());
    }

    #[test]
    fn manual_reconnect_resets_attempts_and_cancels_timer() {
        let mut hub = new_hub();
        let epoch = connect(&mut hub);
        let (_, generation) = retry_of(&hub.on_closed(epoch, false));

        let actions = hub.reconnect();

        assert_eq!(actions[0], HubAction::CancelRetry);
        assert!(matches!(actions[1], HubAction::Open { .. }));
        assert_eq!(hub.stats().reconnect_attempts, 0);
        assert_eq!(hub.status(), ConnectionStatus::Connecting);

        // The superseded timer is ignored
        assert!(hub.retry_elapsed(generation).is_empty());
    }

    #[test]
    fn manual_reconnect_recovers_from_terminal_disconnect() {
        let mut hub = new_hub();
        let epoch = connect(&mut hub);
        hub.subscribe(&[sym("TCS")]);
        hub.on_closed(epoch, true);

        let next = open_epoch(&hub.reconnect());
        let actions = hub.on_opened(next);

        assert_eq!(sent(&actions), vec![ClientFrame::subscribe([sym("TCS")])]);
    }

    #[test]
    fn manual_reconnect_while_open_closes_first() {
        let mut hub = new_hub();
        let old = connect(&mut hub);

        let actions = hub.reconnect();

        assert_eq!(&actions[..2], &[HubAction::StopHeartbeat, HubAction::Close]);
        let new = open_epoch(&actions);
        assert_ne!(old, new);

        // Close event of the old transport is ignored
        assert!(hub.on_closed(old, true).is_empty());
        assert_eq!(hub.status(), ConnectionStatus::Connecting);
    }

    #[test]
    fn stale_epoch_events_are_ignored() {
        let mut hub = new_hub();
        let old = connect(&mut hub);
        let (_, generation) = retry_of(&hub.on_closed(old, false));
        let current = open_epoch(&hub.retry_elapsed(generation));

        assert!(hub.on_opened(old).is_empty());
        assert!(hub.on_message(old, &price_frame("TCS", 1.0)).is_empty());
        assert!(hub.on_transport_error(old, "late").is_empty());
        assert!(hub.on_closed(old, false).is_empty());
        assert_eq!(hub.status(), ConnectionStatus::Connecting);

        hub.on_opened(current);
        assert_eq!(hub.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn only_latest_retry_generation_fires() {
        let mut hub = new_hub();
        let epoch = connect(&mut hub);
        let (_, first) = retry_of(&hub.on_closed(epoch, false));
        let next = open_epoch(&hub.retry_elapsed(first));
        let (_, second) = retry_of(&hub.on_closed(next, false));

        assert!(hub.retry_elapsed(first).is_empty());
        assert_eq!(hub.retry_elapsed(second).len(), 1);
        assert!(hub.retry_elapsed(second).is_empty());
    }

    // -------------------------------------------------------------------------
    // Inbound frames
    // -------------------------------------------------------------------------

    #[test]
    fn price_update_is_stored_and_broadcast() {
        let mut hub = new_hub();
        let epoch = connect(&mut hub);

        let actions = hub.on_message(epoch, &price_frame("reliance", 2456.3));

        let [HubAction::Broadcast(update)] = actions.as_slice() else {
            panic!("expected broadcast, got {actions:?}");
        };
        assert_eq!(update.symbol, sym("RELIANCE"));
        assert_eq!(hub.stats().cached_prices, 1);
    }

    #[test]
    fn update_for_unsubscribed_symbol_is_accepted() {
        let mut hub = new_hub();
        let epoch = connect(&mut hub);
        hub.subscribe(&[sym("TCS")]);
        hub.unsubscribe(&[sym("TCS")]);

        let actions = hub.on_message(epoch, &price_frame("TCS", 3892.45));

        assert_eq!(actions.len(), 1);
        assert!(hub.store.read().get(&sym("TCS")).is_some());
    }

    #[test]
    fn duplicate_update_is_not_rebroadcast() {
        let mut hub = new_hub();
        let epoch = connect(&mut hub);
        let frame = price_frame("TCS", 3892.45);

        assert_eq!(hub.on_message(epoch, &frame).len(), 1);
        let before = hub.store.read().get_all();
        assert!(hub.on_message(epoch, &frame).is_empty());

        assert_eq!(hub.store.read().get_all(), before);
    }

    #[test]
    fn malformed_frames_are_dropped_silently() {
        let mut hub = new_hub();
        let epoch = connect(&mut hub);

        for text in ["not json", "", "[]", r#"{"type":"price_update","symbol":"X"}"#] {
            let actions = hub.on_message(epoch, text);
            assert!(matches!(actions.as_slice(), [HubAction::Discarded { .. }]));
            assert_eq!(hub.status(), ConnectionStatus::Connected);
        }

        let stats = hub.stats();
        assert_eq!(stats.frames_received, 4);
        assert_eq!(stats.frames_dropped, 4);
        assert_eq!(stats.cached_prices, 0);
        assert!(hub.last_message().is_none());
    }

    #[test]
    fn other_messages_become_last_message() {
        let mut hub = new_hub();
        let epoch = connect(&mut hub);
        let text = r#"{"type":"pong","timestamp":"2026-01-16T10:00:00"}"#;

        let actions = hub.on_message(epoch, text);

        let expected = json!({"type": "pong", "timestamp": "2026-01-16T10:00:00"});
        assert_eq!(actions, vec![HubAction::Forward(expected.clone())]);
        assert_eq!(hub.last_message(), Some(&expected));
        assert_eq!(hub.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn server_notices_are_forwarded() {
        let mut hub = new_hub();
        let epoch = connect(&mut hub);

        let connected = json!({
            "type": "connected",
            "client_id": "client_abc",
            "max_subscriptions": 50
        });
        let error = json!({"type": "error", "message": "Maximum 50 subscriptions allowed"});

        assert_eq!(
            hub.on_message(epoch, &connected.to_string()),
            vec![HubAction::Forward(connected)]
        );
        assert_eq!(
            hub.on_message(epoch, &error.to_string()),
            vec![HubAction::Forward(error.clone())]
        );
        assert_eq!(hub.last_message(), Some(&error));
        assert_eq!(hub.status(), ConnectionStatus::Connected);
    }

    // -------------------------------------------------------------------------
    // Heartbeat, snapshots, server queries
    // -------------------------------------------------------------------------

    #[test]
    fn heartbeat_pings_only_while_open() {
        let mut hub = new_hub();
        assert!(hub.heartbeat_due().is_empty());

        let epoch = connect(&mut hub);
        assert_eq!(hub.heartbeat_due(), vec![HubAction::Send(ClientFrame::Ping)]);

        hub.on_closed(epoch, false);
        assert!(hub.heartbeat_due().is_empty());
    }

    #[test]
    fn seed_never_overwrites_pushed_price() {
        let mut hub = new_hub();
        let epoch = connect(&mut hub);
        hub.on_message(epoch, &price_frame("TCS", 3892.45));

        let snapshot: PriceUpdate =
            serde_json::from_str(&price_frame("TCS", 1.0)).unwrap();
        assert!(hub.seed_if_absent(snapshot).is_empty());

        let fresh: PriceUpdate = serde_json::from_str(&price_frame("INFY", 1567.8)).unwrap();
        assert_eq!(hub.seed_if_absent(fresh).len(), 1);
        assert_eq!(hub.stats().cached_prices, 2);
    }

    #[test]
    fn get_subscriptions_only_while_open() {
        let mut hub = new_hub();
        assert!(hub.request_server_subscriptions().is_empty());

        connect(&mut hub);
        assert_eq!(
            hub.request_server_subscriptions(),
            vec![HubAction::Send(ClientFrame::GetSubscriptions)]
        );
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    #[test]
    fn teardown_is_idempotent_and_clears_registry() {
        let mut hub = new_hub();
        let epoch = connect(&mut hub);
        hub.subscribe(&[sym("TCS")]);
        hub.on_message(epoch, &price_frame("TCS", 3892.45));

        let actions = hub.teardown();

        assert_eq!(
            actions,
            vec![
                HubAction::CancelRetry,
                HubAction::StopHeartbeat,
                HubAction::Close
            ]
        );
        assert!(hub.registry().is_empty());
        assert_eq!(hub.status(), ConnectionStatus::Disconnected);
        assert_eq!(hub.stats().cached_prices, 1);

        assert!(hub.teardown().is_empty());
        assert!(hub.on_closed(epoch, true).is_empty());
        assert!(hub.reconnect().is_empty());
        assert!(hub.subscribe(&[sym("INFY")]).is_empty());
        assert!(hub.registry().is_empty());
    }

    #[test]
    fn teardown_during_backoff_cancels_timer() {
        let mut hub = new_hub();
        let epoch = connect(&mut hub);
        let (_, generation) = retry_of(&hub.on_closed(epoch, false));

        assert!(hub.teardown().contains(&HubAction::CancelRetry));
        assert!(hub.retry_elapsed(generation).is_empty());
    }

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    #[derive(Debug, Clone)]
    enum Call {
        Subscribe(usize),
        Unsubscribe(usize),
    }

    fn call_strategy() -> impl Strategy<Value = Call> {
        prop_oneof![
            (0..8usize).prop_map(Call::Subscribe),
            (0..8usize).prop_map(Call::Unsubscribe),
        ]
    }

    proptest! {
        /// N callers on one symbol: the wire sees a subscribe exactly on
        /// 0→1 and an unsubscribe exactly on 1→0.
        #[test]
        fn wire_frames_follow_refcount_transitions(
            calls in proptest::collection::vec(call_strategy(), 0..80)
        ) {
            let mut hub = new_hub();
            connect(&mut hub);
            let symbol = sym("RELIANCE");
            let mut holders = [false; 8];

            for call in calls {
                let before: usize = holders.iter().filter(|h| **h).count();
                let (frames, after) = match call {
                    Call::Subscribe(caller) if !holders[caller] => {
                        holders[caller] = true;
                        (sent(&hub.subscribe(&[symbol.clone()])), before + 1)
                    }
                    Call::Unsubscribe(caller) if holders[caller] => {
                        holders[caller] = false;
                        (sent(&hub.unsubscribe(&[symbol.clone()])), before - 1)
                    }
                    _ => continue,
                };

                let expected = match (before, after) {
                    (0, 1) => vec![ClientFrame::subscribe([symbol.clone()])],
                    (1, 0) => vec![ClientFrame::unsubscribe([symbol.clone()])],
                    _ => Vec::new(),
                };
                prop_assert_eq!(frames, expected);
            }
        }

        /// After any interleaving of calls and a drop, the reopen frame is
        /// exactly the active set.
        #[test]
        fn reopen_frame_is_exact_active_set(
            calls in proptest::collection::vec(call_strategy(), 0..80)
        ) {
            let names = ["A", "B", "C", "D", "E", "F", "G", "H"];
            let mut hub = new_hub();
            let epoch = connect(&mut hub);

            for call in calls {
                match call {
                    Call::Subscribe(i) => { hub.subscribe(&[sym(names[i])]); }
                    Call::Unsubscribe(i) => { hub.unsubscribe(&[sym(names[i])]); }
                }
            }

            let active = hub.registry().snapshot_active();
            let (_, generation) = retry_of(&hub.on_closed(epoch, false));
            let next = open_epoch(&hub.retry_elapsed(generation));
            let frames = sent(&hub.on_opened(next));

            if active.is_empty() {
                prop_assert!(frames.is_empty());
            } else {
                prop_assert_eq!(frames, vec![ClientFrame::subscribe(active)]);
            }
        }
    }
}
