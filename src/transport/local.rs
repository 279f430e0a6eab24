//! Point-to-point WebSocket transport.
//!
//! Target agents connect to a listening socket on the local machine.
//!
//! # Connection Flow
//!
//! 1. [`LocalTransport::start`] binds `host:port`; failure is fatal
//! 2. Each inbound TCP connection is upgraded to WebSocket
//! 3. Every connection is reported through `on_connection`,
//!    `on_message` and `on_disconnection`; the bridge decides which one is
//!    the target when it sends a `HANDSHAKE`
//! 4. [`LocalTransport::stop`] stops accepting and closes all connections
//!
//! # Example
//!
//! ```ignore
//! use agent_bridge::transport::{LocalTransport, local::LocalOptions};
//!
//! let transport = LocalTransport::new(LocalOptions::default().with_port(0));
//! transport.start(events).await?;
//! println!("listening on {}", transport.ws_url().unwrap());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;

use super::{ConnectionHandle, Transport, TransportEvents, WsConnection};

// ============================================================================
// Constants
// ============================================================================

/// Default bind address (localhost).
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Default listening port.
pub const DEFAULT_PORT: u16 = 9223;

// ============================================================================
// Types
// ============================================================================

/// Live connections by ID.
type ConnectionMap = FxHashMap<ConnectionId, WsConnection>;

// ============================================================================
// LocalOptions
// ============================================================================

/// Listening address of a [`LocalTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalOptions {
    /// IP address to bind.
    pub host: IpAddr,
    /// Port to bind (0 lets the OS choose).
    pub port: u16,
}

impl Default for LocalOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST,
            port: DEFAULT_PORT,
        }
    }
}

impl LocalOptions {
    /// Sets the port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Returns the socket address to bind.
    #[inline]
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

// ============================================================================
// Running
// ============================================================================

/// State of a started transport.
struct Running {
    /// Address actually bound.
    local_addr: SocketAddr,
    /// Signals the accept loop to stop.
    shutdown_tx: watch::Sender<bool>,
    /// Accept loop task.
    accept_task: JoinHandle<()>,
    /// Live connections.
    connections: Arc<Mutex<ConnectionMap>>,
}

// ============================================================================
// LocalTransport
// ============================================================================

/// Listening-socket transport.
pub struct LocalTransport {
    options: LocalOptions,
    running: Mutex<Option<Running>>,
}

impl LocalTransport {
    /// Creates a transport; nothing is bound until [`Transport::start`].
    #[must_use]
    pub fn new(options: LocalOptions) -> Self {
        Self {
            options,
            running: Mutex::new(None),
        }
    }

    /// Returns the bound address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    /// Returns the WebSocket URL targets should connect to while running.
    ///
    /// Format: `ws://{host}:{port}`
    #[must_use]
    pub fn ws_url(&self) -> Option<String> {
        self.local_addr().map(|addr| format!("ws://{addr}"))
    }

    /// Returns the number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.running
            .lock()
            .as_ref()
            .map_or(0, |r| r.connections.lock().len())
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn start(&self, events: Arc<dyn TransportEvents>) -> Result<()> {
        if self.running.lock().is_some() {
            return Err(Error::transport("local transport already started"));
        }

        let addr = self.options.addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::transport(format!("failed to bind {addr}: {e}")))?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connections = Arc::new(Mutex::new(ConnectionMap::default()));

        let accept_task = tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            Arc::clone(&connections),
            events,
        ));

        *self.running.lock() = Some(Running {
            local_addr,
            shutdown_tx,
            accept_task,
            connections,
        });

        info!(%local_addr, "Local transport listening");
        Ok(())
    }

    async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };

        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.accept_task.await {
            warn!(error = %e, "Accept loop ended abnormally");
        }

        let connections: Vec<_> = running.connections.lock().drain().collect();
        for (id, connection) in connections {
            connection.close();
            debug!(connection = %id, "Connection closed during shutdown");
        }

        info!(local_addr = %running.local_addr, "Local transport stopped");
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

// ============================================================================
// Accept Loop
// ============================================================================

/// Background task that accepts new connections.
async fn accept_loop(
    listener: TcpListener,
    mut shutdown_rx: watch::Receiver<bool>,
    connections: Arc<Mutex<ConnectionMap>>,
    events: Arc<dyn TransportEvents>,
) {
    debug!("Accept loop started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("Accept loop shutting down");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let connections = Arc::clone(&connections);
                        let events = Arc::clone(&events);
                        let shutdown_rx = shutdown_rx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, shutdown_rx, connections, events).await {
                                warn!(error = %e, %addr, "Connection handling failed");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
        }
    }

    debug!("Accept loop terminated");
}

/// Upgrades one TCP connection and runs it until it closes.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    shutdown_rx: watch::Receiver<bool>,
    connections: Arc<Mutex<ConnectionMap>>,
    events: Arc<dyn TransportEvents>,
) -> Result<()> {
    debug!(%addr, "New TCP connection");

    let ws_stream = tokio_tungstenite::accept_async(stream).await?;

    if *shutdown_rx.borrow() {
        debug!(%addr, "Dropping connection accepted during shutdown");
        return Ok(());
    }

    let (connection, driver) = WsConnection::new(ws_stream);
    let id = connection.id();
    connections.lock().insert(id, connection.clone());

    info!(connection = %id, %addr, "WebSocket connection established");

    let task = driver.spawn(Arc::new(connection), events);
    if let Err(e) = task.await {
        warn!(connection = %id, error = %e, "Connection task ended abnormally");
    }

    connections.lock().remove(&id);
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
