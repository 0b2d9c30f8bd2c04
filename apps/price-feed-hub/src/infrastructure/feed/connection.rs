//! Feed Connection
//!
//! Owns at most one WebSocket transport at a time. It knows how to open,
//! send, receive and notice loss; it holds no retry or subscription logic.
//!
//! Each transport runs in its own task and reports back through a channel
//! of [`ConnectionEvent`]s tagged with the epoch given to [`Connection::open`].
//! A transport always ends with exactly one `Closed` event, including when
//! it never managed to open.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use crate::domain::frame::ClientFrame;

// =============================================================================
// Events
// =============================================================================

/// Event reported by a transport task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The handshake completed.
    Opened {
        /// Epoch of the transport.
        epoch: u64,
    },
    /// A data frame arrived.
    Message {
        /// Epoch of the transport.
        epoch: u64,
        /// Frame payload.
        text: String,
    },
    /// The transport failed to open or broke while open.
    Error {
        /// Epoch of the transport.
        epoch: u64,
        /// Human-readable description.
        message: String,
    },
    /// The transport is gone.
    Closed {
        /// Epoch of the transport.
        epoch: u64,
        /// Closed by us, or by the server with a normal close code.
        clean: bool,
    },
}

// =============================================================================
// Connection
// =============================================================================

struct Link {
    epoch: u64,
    outbound: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Single-transport WebSocket connection.
pub struct Connection {
    events: mpsc::UnboundedSender<ConnectionEvent>,
    codec: JsonCodec,
    link: Option<Link>,
    /// Task of the most recently closed transport, still sending its close frame.
    closing: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("epoch", &self.link.as_ref().map(|link| link.epoch))
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create a connection that reports to `events`.
    #[must_use]
    pub const fn new(events: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self {
            events,
            codec: JsonCodec::new(),
            link: None,
            closing: None,
        }
    }

    /// Open a transport to `url`, closing any existing one first.
    ///
    /// Never fails directly: a transport that cannot be established
    /// reports `Error` followed by `Closed { clean: false }`.
    pub fn open(&mut self, epoch: u64, url: &str) {
        self.close();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_transport(
            epoch,
            url.to_string(),
            self.events.clone(),
            outbound_rx,
            Arc::clone(&open),
            cancel.clone(),
        ));

        self.link = Some(Link {
            epoch,
            outbound: outbound_tx,
            open,
            cancel,
            task,
        });
    }

    /// Send a frame on the open transport.
    ///
    /// Returns `false` without queueing anything when no transport is open.
    pub fn send(&self, frame: &ClientFrame) -> bool {
        let Some(link) = self.link.as_ref() else {
            return false;
        };
        if !link.open.load(Ordering::Acquire) {
            return false;
        }

        match self.codec.encode(frame) {
            Ok(message) => link.outbound.send(message).is_ok(),
            Err(e) => {
                tracing::error!(error = %e, kind = frame.kind(), "Failed to encode frame");
                false
            }
        }
    }

    /// Close the current transport, if any. Idempotent.
    pub fn close(&mut self) {
        if let Some(link) = self.link.take() {
            link.open.store(false, Ordering::Release);
            link.cancel.cancel();
            tracing::debug!(epoch = link.epoch, "Closing feed transport");
            self.closing = Some(link.task);
        }
    }

    /// Close the current transport and wait up to `grace` for its task to
    /// finish sending the close frame.
    ///
    /// Returns `true` if no transport task is left running.
    pub async fn shutdown(&mut self, grace: Duration) -> bool {
        self.close();
        let Some(task) = self.closing.take() else {
            return true;
        };

        match tokio::time::timeout(grace, task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Feed transport task failed");
                true
            }
            Err(_) => {
                tracing::warn!(?grace, "Feed transport did not close in time");
                false
            }
        }
    }

    /// Check if a transport is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.open.load(Ordering::Acquire))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Transport Task
// =============================================================================

async fn run_transport(
    epoch: u64,
    url: String,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let emit = |event: ConnectionEvent| {
        // The hub may already be gone
        let _ = events.send(event);
    };

    let connected = tokio::select! {
        () = cancel.cancelled() => {
            emit(ConnectionEvent::Closed { epoch, clean: true });
            return;
        }
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };

    let ws_stream = match connected {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            tracing::warn!(epoch, url = %url, error = %e, "Failed to connect to price feed");
            emit(ConnectionEvent::Error {
                epoch,
                message: e.to_string(),
            });
            emit(ConnectionEvent::Closed {
                epoch,
                clean: false,
            });
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();
    let codec = JsonCodec::new();

    if cancel.is_cancelled() {
        let _ = write.close().await;
        emit(ConnectionEvent::Closed { epoch, clean: true });
        return;
    }

    open.store(true, Ordering::Release);
    emit(ConnectionEvent::Opened { epoch });

    let clean = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let close = Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client closing".to_string().into(),
                }));
                let _ = write.send(close).await;
                break true;
            }
            Some(message) = outbound.recv() => {
                if let Err(e) = write.send(message).await {
                    emit(ConnectionEvent::Error { epoch, message: e.to_string() });
                    break false;
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            emit(ConnectionEvent::Error { epoch, message: e.to_string() });
                            break false;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let clean = frame
                            .as_ref()
                            .is_some_and(|frame| frame.code == CloseCode::Normal);
                        tracing::info!(epoch, clean, "Server sent close frame");
                        break clean;
                    }
                    Some(Ok(message)) => match codec.decode_text(&message) {
                        Ok(Some(text)) => emit(ConnectionEvent::Message { epoch, text }),
                        Ok(None) => {}
                        Err(e) => tracing::debug!(epoch, error = %e, "Dropping undecodable frame"),
                    },
                    Some(Err(e)) => {
                        emit(ConnectionEvent::Error { epoch, message: e.to_string() });
                        break false;
                    }
                    None => {
                        tracing::info!(epoch, "Feed stream ended");
                        break false;
                    }
                }
            }
        }
    };

    open.store(false, Ordering::Release);
    emit(ConnectionEvent::Closed { epoch, clean });
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::*;

    /// Accept one WebSocket client and report the code of the close frame it sends.
    async fn serve_once() -> (String, oneshot::Receiver<Option<CloseCode>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (close_tx, close_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Close(frame) = message {
                    let _ = close_tx.send(frame.map(|frame| frame.code));
                    break;
                }
            }
        });

        (format!("ws://{addr}/ws/stocks/test"), close_rx)
    }

    #[tokio::test]
    async fn send_without_transport_is_noop() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let connection = Connection::new(events_tx);

        assert!(!connection.send(&ClientFrame::Ping));
        assert!(!connection.is_open());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut connection = Connection::new(events_tx);

        connection.close();
        connection.close();

        assert!(!connection.is_open());
    }

    #[tokio::test]
    async fn shutdown_waits_for_close_frame() {
        let (url, close_rx) = serve_once().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut connection = Connection::new(events_tx);

        connection.open(3, &url);
        assert_eq!(
            events_rx.recv().await.unwrap(),
            ConnectionEvent::Opened { epoch: 3 }
        );

        assert!(connection.shutdown(Duration::from_secs(2)).await);

        // The transport task has finished, so its final event is already queued
        assert_eq!(
            events_rx.try_recv().unwrap(),
            ConnectionEvent::Closed {
                epoch: 3,
                clean: true
            }
        );
        let code = tokio::time::timeout(Duration::from_secs(2), close_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, Some(CloseCode::Normal));
        assert!(!connection.is_open());
    }

    #[tokio::test]
    async fn shutdown_without_transport_returns_immediately() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut connection = Connection::new(events_tx);

        assert!(connection.shutdown(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_error_then_unclean_close() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut connection = Connection::new(events_tx);

        // Nothing listens on port 9 (discard) in the test environment
        connection.open(7, "ws://127.0.0.1:9/ws/stocks/test");

        let first = events_rx.recv().await.unwrap();
        assert!(matches!(first, ConnectionEvent::Error { epoch: 7, .. }));
        assert_eq!(
            events_rx.recv().await.unwrap(),
            ConnectionEvent::Closed {
                epoch: 7,
                clean: false
            }
        );
        assert!(!connection.send(&ClientFrame::Ping));
    }

    #[tokio::test]
    async fn invalid_url_reports_error() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut connection = Connection::new(events_tx);

        connection.open(1, "not a url");

        assert!(matches!(
            events_rx.recv().await.unwrap(),
            ConnectionEvent::Error { epoch: 1, .. }
        ));
        assert!(matches!(
            events_rx.recv().await.unwrap(),
            ConnectionEvent::Closed { epoch: 1, clean: false }
        ));
    }
}
