//! WebSocket connection handle and I/O loop.
//!
//! [`WsConnection::new`] splits a WebSocket stream into a cheap handle and a
//! [`SocketDriver`]. The driver runs on its own tokio task and handles:
//!
//! - Incoming text frames, forwarded to [`TransportEvents::on_message`]
//! - Outgoing frames queued through [`ConnectionHandle::send`]
//! - Close requests from [`ConnectionHandle::close`]
//!
//! The driver fires `on_connection` when it starts and `on_disconnection`
//! exactly once when the loop ends, whichever side closed.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;

use super::{ConnectionHandle, SharedConnection, TransportEvents};

// ============================================================================
// Outbound
// ============================================================================

/// Internal commands for the I/O loop.
enum Outbound {
    /// Send a text frame.
    Frame(String),
    /// Close the socket.
    Close,
}

// ============================================================================
// WsConnection
// ============================================================================

/// Handle to one WebSocket connection.
///
/// Sending never blocks: frames are queued to the connection's I/O task.
#[derive(Clone)]
pub struct WsConnection {
    /// Identity of this connection.
    id: ConnectionId,
    /// Channel to the I/O loop.
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    /// Cleared when the loop ends or a close is requested.
    open: Arc<AtomicBool>,
}

impl fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConnection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl WsConnection {
    /// Wraps a WebSocket stream.
    ///
    /// Nothing runs until the returned driver is spawned.
    pub(crate) fn new<S>(ws_stream: WebSocketStream<S>) -> (Self, SocketDriver<S>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let connection = Self {
            id: ConnectionId::next(),
            outbound_tx,
            open: Arc::clone(&open),
        };
        let driver = SocketDriver {
            ws_stream,
            outbound_rx,
            open,
        };

        (connection, driver)
    }
}

impl ConnectionHandle for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, frame: String) -> Result<()> {
        if !self.is_open() {
            return Err(Error::transport(format!("{} is closed", self.id)));
        }

        self.outbound_tx
            .send(Outbound::Frame(frame))
            .map_err(|_| Error::transport(format!("{} is closed", self.id)))
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.outbound_tx.send(Outbound::Close);
            debug!(connection = %self.id, "Close requested");
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outbound_tx.is_closed()
    }
}

// ============================================================================
// SocketDriver
// ============================================================================

/// The I/O half of a [`WsConnection`].
pub(crate) struct SocketDriver<S> {
    ws_stream: WebSocketStream<S>,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
}

impl<S> SocketDriver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Spawns the I/O loop.
    ///
    /// `handle` is what the events report; it may be the bare
    /// [`WsConnection`] or a wrapper around it.
    pub(crate) fn spawn(
        self,
        handle: SharedConnection,
        events: Arc<dyn TransportEvents>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(handle, events))
    }

    /// I/O loop.
    async fn run(self, handle: SharedConnection, events: Arc<dyn TransportEvents>) {
        let Self {
            ws_stream,
            mut outbound_rx,
            open,
        } = self;
        let connection_id = handle.id();
        let (mut ws_write, mut ws_read) = ws_stream.split();

        events.on_connection(Arc::clone(&handle));

        loop {
            tokio::select! {
                // Incoming frames from the peer
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            trace!(connection = %connection_id, len = text.len(), "Frame received");
                            events.on_message(Arc::clone(&handle), &text);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!(connection = %connection_id, "WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(connection = %connection_id, error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!(connection = %connection_id, "WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Frames queued by the bridge
                command = outbound_rx.recv() => {
                    match command {
                        Some(Outbound::Frame(frame)) => {
                            if let Err(e) = ws_write.send(Message::Text(frame.into())).await {
                                warn!(connection = %connection_id, error = %e, "Failed to send frame");
                                break;
                            }
                            trace!(connection = %connection_id, "Frame sent");
                        }

                        Some(Outbound::Close) => {
                            let _ = ws_write.close().await;
                            debug!(connection = %connection_id, "WebSocket closed locally");
                            break;
                        }

                        None => {
                            debug!(connection = %connection_id, "Outbound channel closed");
                            break;
                        }
                    }
                }
            }
        }

        open.store(false, Ordering::SeqCst);
        outbound_rx.close();
        events.on_disconnection(handle);

        debug!(connection = %connection_id, "I/O loop terminated");
    }
}

// ============================================================================
// Tests
// ============================================================================
