//! Price Hub Driver
//!
//! Runs the [`HubCore`] state machine as a single tokio task and carries
//! out the actions it emits. Everything the hub owns (the connection, the
//! heartbeat, the one retry timer, the registry and the writer side of the
//! price store) lives inside that task, so every event is handled to
//! completion before the next one starts.
//!
//! Consumers talk to the task through a cloneable [`HubHandle`]. Mutating
//! calls enqueue a command and return immediately; reads go through watch
//! channels and the shared, read-only [`PriceView`].
//!
//! # Event Sources
//!
//! ```text
//!  HubHandle ──commands──┐
//!  Connection ──events───┤
//!  Heartbeat ──due───────┼──► select! ──► HubCore ──actions──► execute
//!  Retry timer ──due─────┘
//! ```

use std::future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use uuid::Uuid;

use super::connection::{Connection, ConnectionEvent};
use super::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
use crate::application::hub::{HubAction, HubCore, HubSettings, HubStats};
use crate::application::ports::{QuoteError, QuoteSource};
use crate::domain::price::{PriceStore, PriceUpdate, PriceView};
use crate::domain::reconnect::ReconnectConfig;
use crate::domain::status::ConnectionStatus;
use crate::domain::symbol::Symbol;
use crate::infrastructure::broadcast::{
    BroadcastConfig, BroadcastStats, PriceBroadcast, SharedPriceBroadcast,
};
use crate::infrastructure::config::FeedConfig;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// How long teardown waits for the transport to deliver its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Configuration of one hub instance.
#[derive(Debug, Clone)]
pub struct PriceHubConfig {
    /// Feed base URL; the client id is appended as the final segment.
    pub feed_url: String,
    /// Fixed client id. A fresh one is generated when `None`.
    pub client_id: Option<String>,
    /// Keep-alive settings.
    pub heartbeat: HeartbeatConfig,
    /// Backoff settings.
    pub reconnect: ReconnectConfig,
    /// Update fan-out settings.
    pub broadcast: BroadcastConfig,
}

impl PriceHubConfig {
    /// Configuration with default timings for `feed_url`.
    #[must_use]
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
            client_id: None,
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }

    /// Build from loaded settings.
    #[must_use]
    pub fn from_feed_config(config: &FeedConfig) -> Self {
        Self {
            feed_url: config.feed.url.clone(),
            client_id: None,
            heartbeat: HeartbeatConfig::new(config.websocket.heartbeat_interval),
            reconnect: ReconnectConfig::new(
                config.websocket.reconnect_delay_base,
                config.websocket.reconnect_delay_max,
                0.0,
                config.websocket.max_reconnect_attempts,
            ),
            broadcast: BroadcastConfig {
                price_updates_capacity: config.broadcast.price_updates_capacity,
            },
        }
    }
}

/// Generate a client identity token.
#[must_use]
pub fn generate_client_id() -> String {
    format!("client_{}", Uuid::new_v4().simple())
}

/// Hub start-up errors.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// `spawn` was called outside a tokio runtime.
    #[error("price hub must be spawned inside a tokio runtime")]
    NoRuntime,
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug)]
enum Command {
    Subscribe(Vec<Symbol>),
    Unsubscribe(Vec<Symbol>),
    Seed(PriceUpdate),
    Reconnect,
    RequestSubscriptions,
    Teardown,
}

// =============================================================================
// Retry Timer
// =============================================================================

#[derive(Debug)]
struct RetryTimer {
    generation: u64,
    sleep: Pin<Box<Sleep>>,
}

impl RetryTimer {
    fn new(delay: Duration, generation: u64) -> Self {
        Self {
            generation,
            sleep: Box::pin(tokio::time::sleep(delay)),
        }
    }
}

async fn retry_due(retry: &mut Option<RetryTimer>) -> u64 {
    match retry {
        Some(timer) => {
            timer.sleep.as_mut().await;
            timer.generation
        }
        None => future::pending().await,
    }
}

// =============================================================================
// Price Hub
// =============================================================================

/// The hub task. Create with [`PriceHub::new`] and drive with
/// [`PriceHub::run`], or use [`PriceHub::spawn`].
#[derive(Debug)]
pub struct PriceHub {
    core: HubCore,
    connection: Connection,
    heartbeat: HeartbeatMonitor,
    retry: Option<RetryTimer>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    last_message_tx: watch::Sender<Option<Value>>,
    stats_tx: watch::Sender<HubStats>,
    updates: SharedPriceBroadcast,
}

impl PriceHub {
    /// Create a hub and the first handle to it.
    ///
    /// Nothing connects until [`PriceHub::run`] is polled.
    #[must_use]
    pub fn new(config: PriceHubConfig) -> (Self, HubHandle) {
        let client_id = config.client_id.unwrap_or_else(generate_client_id);
        let store = Arc::new(RwLock::new(PriceStore::new()));

        let core = HubCore::new(
            &HubSettings {
                feed_url: config.feed_url,
                client_id: client_id.clone(),
                reconnect: config.reconnect,
            },
            Arc::clone(&store),
        );

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(core.status());
        let (last_message_tx, last_message_rx) = watch::channel(None);
        let (stats_tx, stats_rx) = watch::channel(core.stats());
        let updates = Arc::new(PriceBroadcast::new(config.broadcast));

        let handle = HubHandle {
            commands: commands_tx,
            status: status_rx,
            last_message: last_message_rx,
            stats: stats_rx,
            prices: PriceView::new(store),
            updates: Arc::clone(&updates),
            client_id: Arc::from(client_id),
        };

        let hub = Self {
            core,
            connection: Connection::new(events_tx),
            heartbeat: HeartbeatMonitor::new(config.heartbeat),
            retry: None,
            commands: commands_rx,
            events: events_rx,
            status_tx,
            last_message_tx,
            stats_tx,
            updates,
        };

        (hub, handle)
    }

    /// Create a hub and run it on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a tokio runtime.
    pub fn spawn(config: PriceHubConfig) -> Result<(HubHandle, JoinHandle<()>), HubError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| HubError::NoRuntime)?;
        let (hub, handle) = Self::new(config);
        let task = runtime.spawn(hub.run());
        Ok((handle, task))
    }

    /// Run until torn down or until every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!(endpoint = %self.core.endpoint(), "Price hub starting");

        let actions = self.core.start();
        self.execute(actions);
        self.publish();

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::info!("All hub handles dropped");
                        let actions = self.core.teardown();
                        self.execute(actions);
                        break;
                    };
                    if self.handle_command(command) {
                        break;
                    }
                }
                Some(event) = self.events.recv() => {
                    self.handle_event(event);
                }
                () = self.heartbeat.due() => {
                    self.heartbeat.start();
                    let actions = self.core.heartbeat_due();
                    self.execute(actions);
                }
                generation = retry_due(&mut self.retry) => {
                    self.retry = None;
                    let actions = self.core.retry_elapsed(generation);
                    self.execute(actions);
                }
            }

            self.publish();
        }

        self.publish();
        self.connection.shutdown(CLOSE_GRACE).await;
        tracing::info!("Price hub stopped");
    }

    /// Returns `true` when the hub should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        let actions = match command {
            Command::Subscribe(symbols) => self.core.subscribe(&symbols),
            Command::Unsubscribe(symbols) => self.core.unsubscribe(&symbols),
            Command::Seed(update) => self.core.seed_if_absent(update),
            Command::Reconnect => self.core.reconnect(),
            Command::RequestSubscriptions => self.core.request_server_subscriptions(),
            Command::Teardown => {
                let actions = self.core.teardown();
                self.execute(actions);
                return true;
            }
        };
        self.execute(actions);
        false
    }

    fn handle_event(&mut self, event: ConnectionEvent) {
        let actions = match event {
            ConnectionEvent::Opened { epoch } => self.core.on_opened(epoch),
            ConnectionEvent::Message { epoch, text } => {
                let actions = self.core.on_message(epoch, &text);
                record_received(&actions);
                actions
            }
            ConnectionEvent::Error { epoch, message } => {
                self.core.on_transport_error(epoch, &message)
            }
            ConnectionEvent::Closed { epoch, clean } => self.core.on_closed(epoch, clean),
        };
        self.execute(actions);
    }

    fn execute(&mut self, actions: Vec<HubAction>) {
        for action in actions {
            match action {
                HubAction::Open { epoch, url } => self.connection.open(epoch, &url),
                HubAction::Send(frame) => {
                    if self.connection.send(&frame) {
                        self.heartbeat.record_send();
                        metrics::record_frame_sent(frame.kind());
                    } else {
                        tracing::debug!(kind = frame.kind(), "Frame not sent, transport closed");
                    }
                }
                HubAction::Close => self.connection.close(),
                HubAction::StartHeartbeat => self.heartbeat.start(),
                HubAction::StopHeartbeat => self.heartbeat.stop(),
                HubAction::ScheduleRetry { delay, generation } => {
                    metrics::record_reconnect();
                    self.retry = Some(RetryTimer::new(delay, generation));
                }
                HubAction::CancelRetry => self.retry = None,
                HubAction::Broadcast(update) => {
                    let _ = self.updates.send(update);
                }
                HubAction::Forward(value) => {
                    self.last_message_tx.send_replace(Some(value));
                }
                HubAction::Discarded { reason } => {
                    metrics::record_frame_dropped();
                    tracing::trace!(reason = %reason, "Frame discarded");
                }
            }
        }
    }

    fn publish(&self) {
        let status = self.core.status();
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        if changed {
            tracing::debug!(status = %status, "Connection status changed");
            metrics::set_connection_status(status);
        }

        let stats = self.core.stats();
        metrics::set_active_symbols(stats.active_symbols);
        metrics::set_cached_prices(stats.cached_prices);
        self.stats_tx.send_if_modified(|current| {
            if *current == stats {
                return false;
            }
            *current = stats;
            true
        });
    }
}

fn record_received(actions: &[HubAction]) {
    for action in actions {
        match action {
            HubAction::Broadcast(_) => metrics::record_frame_received("price_update"),
            HubAction::Forward(value) => metrics::record_frame_received(
                value.get("type").and_then(Value::as_str).unwrap_or("unknown"),
            ),
            _ => {}
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Consumer-facing handle to a running hub.
///
/// Cheap to clone. Calls made after the hub has stopped are silent no-ops
/// and reads keep returning the last published values.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    last_message: watch::Receiver<Option<Value>>,
    stats: watch::Receiver<HubStats>,
    prices: PriceView,
    updates: SharedPriceBroadcast,
    client_id: Arc<str>,
}

impl HubHandle {
    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::trace!("Price hub stopped, ignoring command");
        }
    }

    /// Add one unit of interest for each symbol.
    ///
    /// Symbols are normalized; blanks are ignored and duplicates within
    /// one call count once.
    pub fn subscribe<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = Symbol::parse_all(symbols);
        if !symbols.is_empty() {
            self.send(Command::Subscribe(symbols));
        }
    }

    /// Remove one unit of interest for each symbol.
    pub fn unsubscribe<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = Symbol::parse_all(symbols);
        if !symbols.is_empty() {
            self.send(Command::Unsubscribe(symbols));
        }
    }

    /// Subscribe and get a guard that unsubscribes the same symbols when
    /// dropped.
    #[must_use = "dropping the guard immediately releases the subscription"]
    pub fn acquire<I, S>(&self, symbols: I) -> SubscriptionGuard
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = Symbol::parse_all(symbols);
        if !symbols.is_empty() {
            self.send(Command::Subscribe(symbols.clone()));
        }
        SubscriptionGuard {
            handle: self.clone(),
            symbols,
        }
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Receiver notified on every status change.
    #[must_use]
    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Read-only view of the price store.
    #[must_use]
    pub fn prices(&self) -> PriceView {
        self.prices.clone()
    }

    /// Latest price for a symbol (case-insensitive).
    #[must_use]
    pub fn price(&self, symbol: &str) -> Option<PriceUpdate> {
        self.prices.get(symbol)
    }

    /// Latest price, fetching and seeding a snapshot when none is known.
    ///
    /// The snapshot is stored only if no push update arrived meanwhile.
    ///
    /// # Errors
    ///
    /// Returns an error for a blank symbol or a failed lookup.
    pub async fn price_or_fetch<Q>(
        &self,
        symbol: &str,
        source: &Q,
    ) -> Result<PriceUpdate, QuoteError>
    where
        Q: QuoteSource + ?Sized,
    {
        let Some(symbol) = Symbol::parse(symbol) else {
            return Err(QuoteError::InvalidSymbol(symbol.to_string()));
        };

        if let Some(update) = self.prices.get(symbol.as_str()) {
            return Ok(update);
        }

        let update = PriceUpdate::from(source.fetch_quote(&symbol).await?);
        self.send(Command::Seed(update.clone()));
        Ok(update)
    }

    /// Last opaque (non-price) server message.
    #[must_use]
    pub fn last_message(&self) -> Option<Value> {
        self.last_message.borrow().clone()
    }

    /// Receiver notified on every new opaque server message.
    #[must_use]
    pub fn last_message_changes(&self) -> watch::Receiver<Option<Value>> {
        self.last_message.clone()
    }

    /// Receiver of applied price updates.
    #[must_use]
    pub fn updates(&self) -> broadcast::Receiver<PriceUpdate> {
        self.updates.subscribe()
    }

    /// Stream of applied price updates that skips over lag.
    #[must_use]
    pub fn update_stream(&self) -> Pin<Box<dyn Stream<Item = PriceUpdate> + Send>> {
        self.updates.stream()
    }

    /// Force a fresh connection attempt with the attempt count reset.
    pub fn reconnect(&self) {
        self.send(Command::Reconnect);
    }

    /// Ask the server which symbols it holds for this client. The reply
    /// arrives as the next `last_message`.
    pub fn request_server_subscriptions(&self) {
        self.send(Command::RequestSubscriptions);
    }

    /// Stop the hub: cancel timers, close cleanly, clear interest.
    ///
    /// Safe to call any number of times.
    pub fn teardown(&self) {
        self.send(Command::Teardown);
    }

    /// Latest published counters.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        self.stats.borrow().clone()
    }

    /// Update channel statistics.
    #[must_use]
    pub fn broadcast_stats(&self) -> BroadcastStats {
        self.updates.stats()
    }

    /// Client identity token used in the feed URL.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Check if the hub task is still accepting commands.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

// =============================================================================
// Subscription Guard
// =============================================================================

/// Scoped interest in a set of symbols.
///
/// Releases exactly the acquired symbols on drop, on every exit path.
#[derive(Debug)]
pub struct SubscriptionGuard {
    handle: HubHandle,
    symbols: Vec<Symbol>,
}

impl SubscriptionGuard {
    /// The normalized symbols held by this guard.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if !self.symbols.is_empty() {
            self.handle
                .send(Command::Unsubscribe(std::mem::take(&mut self.symbols)));
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
