//! Discovery-based relay transport.
//!
//! Target agents and the bridge meet on a shared relay server that groups
//! WebSocket clients into rooms. Two kinds of room are used:
//!
//! | Room | Address | Traffic |
//! |------|---------|---------|
//! | Discovery | `{relay_url}/{discovery_room}` | `PEER_ANNOUNCE` beacons from targets |
//! | Session | `{relay_url}/{peer_id}` | Bridge frames with the selected target |
//!
//! # Lifecycle
//!
//! - [`RelayTransport::start`] never fails on network errors: the discovery
//!   room is joined in the background and rejoined after
//!   [`RelayOptions::reconnect_backoff`] for as long as the transport runs.
//! - A periodic sweep evicts peers that stopped announcing
//!   ([`RelayOptions::peer_ttl`]). Evicting the active peer closes its
//!   session and opens one to the freshest remaining peer.
//! - Discovery-room drops do not touch the session room.
//! - When a session opens the bridge sends a `HANDSHAKE` hello so a target
//!   already waiting in the room answers with its own `HANDSHAKE`.
//!
//! See [`registry`] for the selection rules.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, PeerId};
use crate::protocol::{self, Frame};

use super::{ConnectionHandle, SharedConnection, Transport, TransportEvents};

// ============================================================================
// Submodules
// ============================================================================

/// Discovery registry and peer selection.
pub mod registry;

/// Session-room connection proxy.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use registry::{DiscoveryRegistry, PeerRecord, PeerSelection, SweepOutcome};
pub use session::SessionProxy;

// ============================================================================
// Constants
// ============================================================================

/// Default discovery room ID.
pub const DEFAULT_DISCOVERY_ROOM: &str = "discovery";

/// Default time a peer may stay silent before eviction.
pub const DEFAULT_PEER_TTL: Duration = Duration::from_secs(30);

/// Default interval between stale sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Default delay before rejoining the discovery room.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

// ============================================================================
// RelayOptions
// ============================================================================

/// Configuration of a [`RelayTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    /// Base URL of the relay (`ws://` or `wss://`).
    pub relay_url: String,
    /// Discovery room ID.
    pub discovery_room: String,
    /// Silence allowed before a peer is evicted.
    pub peer_ttl: Duration,
    /// Interval between stale sweeps.
    pub sweep_interval: Duration,
    /// Delay before rejoining the discovery room after a drop.
    pub reconnect_backoff: Duration,
    /// Name sent in the session hello.
    pub client_name: Option<String>,
}

impl RelayOptions {
    /// Creates options for a relay with default timings.
    #[must_use]
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            discovery_room: DEFAULT_DISCOVERY_ROOM.to_string(),
            peer_ttl: DEFAULT_PEER_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            client_name: None,
        }
    }

    /// Sets the discovery room ID.
    #[inline]
    #[must_use]
    pub fn with_discovery_room(mut self, room: impl Into<String>) -> Self {
        self.discovery_room = room.into();
        self
    }

    /// Sets the stale-peer TTL.
    #[inline]
    #[must_use]
    pub fn with_peer_ttl(mut self, ttl: Duration) -> Self {
        self.peer_ttl = ttl;
        self
    }

    /// Sets the sweep interval.
    #[inline]
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the discovery reconnect backoff.
    #[inline]
    #[must_use]
    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Sets the name sent in the session hello.
    #[inline]
    #[must_use]
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Parses and checks the relay URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a non-WebSocket scheme, an empty room
    /// ID, or a zero timing.
    pub fn validate(&self) -> Result<Url> {
        let url = Url::parse(&self.relay_url)?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "relay URL must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }
        if url.cannot_be_a_base() {
            return Err(Error::config(format!("relay URL cannot hold rooms: {url}")));
        }
        if self.discovery_room.is_empty() {
            return Err(Error::config("discovery room must not be empty"));
        }
        if self.peer_ttl.is_zero() || self.sweep_interval.is_zero() || self.reconnect_backoff.is_zero()
        {
            return Err(Error::config("relay timings must be non-zero"));
        }

        Ok(url)
    }
}

/// Appends `room` as the last path segment of `base`.
fn room_url(base: &Url, room: &str) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| Error::config(format!("relay URL cannot hold rooms: {base}")))?
        .pop_if_empty()
        .push(room);
    Ok(url)
}

// ============================================================================
// RelayInner
// ============================================================================

/// Shared state of a relay transport.
struct RelayInner {
    options: RelayOptions,
    /// Parsed relay URL.
    base_url: Url,
    /// Announced peers and selection. Locked before `session`.
    registry: Mutex<DiscoveryRegistry>,
    /// Open session, if any.
    session: Mutex<Option<Arc<SessionProxy>>>,
    /// Owner's callbacks while running.
    events: Mutex<Option<Arc<dyn TransportEvents>>>,
    /// `true` once stop was requested.
    shutdown_tx: watch::Sender<bool>,
    /// Discovery and sweep tasks.
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Whether the discovery room is currently joined.
    discovery_connected: AtomicBool,
}

impl RelayInner {
    fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    // ========================================================================
    // Discovery room
    // ========================================================================

    /// Keeps the discovery room joined until shutdown.
    async fn discovery_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let url = match room_url(&self.base_url, &self.options.discovery_room) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot address discovery room");
                return;
            }
        };

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let attempt = tokio::select! {
                result = connect_async(url.as_str()) => Some(result),
                _ = shutdown_rx.changed() => None,
            };

            match attempt {
                None => break,
                Some(Ok((ws_stream, _))) => {
                    info!(%url, "Discovery room joined");
                    self.discovery_connected.store(true, Ordering::SeqCst);
                    self.read_discovery(ws_stream, &mut shutdown_rx).await;
                    self.discovery_connected.store(false, Ordering::SeqCst);

                    if *shutdown_rx.borrow() {
                        break;
                    }
                    warn!(
                        backoff_ms = self.options.reconnect_backoff.as_millis() as u64,
                        "Discovery room dropped, rejoining"
                    );
                }
                Some(Err(e)) => {
                    warn!(
                        error = %e,
                        backoff_ms = self.options.reconnect_backoff.as_millis() as u64,
                        "Discovery room unreachable, retrying"
                    );
                }
            }

            tokio::select! {
                _ = sleep(self.options.reconnect_backoff) => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        debug!("Discovery loop terminated");
    }

    /// Reads announces until the discovery socket closes or shutdown.
    async fn read_discovery(
        self: &Arc<Self>,
        mut ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                message = ws_stream.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => self.handle_discovery_frame(&text),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            warn!(error = %e, "Discovery socket error");
                            break;
                        }
                        _ => {}
                    }
                }

                _ = shutdown_rx.changed() => {
                    let _ = ws_stream.close(None).await;
                    break;
                }
            }
        }
    }

    /// Applies one discovery-room frame.
    fn handle_discovery_frame(self: &Arc<Self>, raw: &str) {
        let frame = match protocol::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping discovery frame");
                return;
            }
        };

        match frame {
            Frame::PeerAnnounce {
                peer_id,
                display_name,
            } => {
                trace!(peer = %peer_id, "Peer announce");
                let selected = self
                    .registry
                    .lock()
                    .announce(peer_id, display_name, Instant::now());

                if let Some(peer_id) = selected {
                    info!(peer = %peer_id, "Peer selected");
                    self.spawn_session(peer_id);
                }
            }
            other => debug!(kind = other.kind(), "Ignoring discovery frame"),
        }
    }

    // ========================================================================
    // Sweep
    // ========================================================================

    /// Evicts stale peers on every tick until shutdown.
    async fn sweep_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.options.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => self.sweep(Instant::now()),
                _ = shutdown_rx.changed() => {}
            }
        }

        debug!("Sweep loop terminated");
    }

    /// Runs one stale sweep.
    fn sweep(self: &Arc<Self>, now: Instant) {
        let (outcome, closed_session) = {
            let mut registry = self.registry.lock();
            let outcome = registry.sweep(now, self.options.peer_ttl);
            let closed_session = if outcome.closed.is_some() {
                self.session.lock().take()
            } else {
                None
            };
            (outcome, closed_session)
        };

        for peer_id in &outcome.evicted {
            info!(peer = %peer_id, "Stale peer evicted");
        }

        // The owner must hear about the eviction before the next peer binds.
        if let Some(proxy) = closed_session {
            proxy.close();
            let events = self.events.lock().clone();
            if let Some(events) = events {
                events.on_disconnection(proxy);
            }
        }

        if let Some(peer_id) = outcome.opened {
            info!(peer = %peer_id, "Failing over to peer");
            self.spawn_session(peer_id);
        }
    }

    // ========================================================================
    // Session room
    // ========================================================================

    fn spawn_session(self: &Arc<Self>, peer_id: PeerId) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.open_session(peer_id).await });
    }

    /// Joins the session room of `peer_id` if it is still selected.
    async fn open_session(self: Arc<Self>, peer_id: PeerId) {
        let events = self.events.lock().clone();
        let Some(events) = events else {
            debug!(peer = %peer_id, "Transport not running, releasing selection");
            self.registry.lock().release(&peer_id);
            return;
        };
        let display_name = self
            .registry
            .lock()
            .get(&peer_id)
            .map(|record| record.display_name.clone())
            .unwrap_or_default();

        let connected = match room_url(&self.base_url, peer_id.as_str()) {
            Ok(url) => SessionProxy::connect(url, peer_id.clone(), display_name).await,
            Err(e) => Err(e),
        };

        let (proxy, driver) = match connected {
            Ok(pair) => pair,
            Err(e) => {
                warn!(peer = %peer_id, error = %e, "Session open failed");
                self.registry.lock().release(&peer_id);
                return;
            }
        };

        // The selection may have moved on while connecting.
        let proxy = Arc::new(proxy);
        {
            let registry = self.registry.lock();
            if self.is_shutdown() || registry.active() != Some(&peer_id) {
                debug!(peer = %peer_id, "Session no longer wanted, dropping");
                return;
            }

            let previous = self.session.lock().replace(Arc::clone(&proxy));
            if let Some(previous) = previous {
                previous.close();
            }
        }

        let session_events: Arc<dyn TransportEvents> = Arc::new(SessionEvents {
            relay: Arc::downgrade(&self),
            inner: events,
        });
        driver.spawn(Arc::clone(&proxy) as SharedConnection, session_events);

        let hello = protocol::encode_handshake(self.options.client_name.as_deref())
            .and_then(|frame| proxy.send(frame));
        if let Err(e) = hello {
            warn!(peer = %peer_id, error = %e, "Session hello failed");
        }

        info!(peer = %peer_id, url = %proxy.url(), "Session opened");
    }

    /// Releases the selection when the relay closed the active session.
    ///
    /// Sessions already detached by a sweep or stop are ignored.
    fn session_closed(&self, connection_id: ConnectionId) {
        let mut registry = self.registry.lock();
        let detached = self
            .session
            .lock()
            .take_if(|proxy| proxy.id() == connection_id);

        if let Some(proxy) = detached {
            registry.release(proxy.peer_id());
            info!(peer = %proxy.peer_id(), "Session closed by relay");
        }
    }
}

// ============================================================================
// SessionEvents
// ============================================================================

/// Forwards session events to the owner, tracking session closes.
struct SessionEvents {
    relay: Weak<RelayInner>,
    inner: Arc<dyn TransportEvents>,
}

impl TransportEvents for SessionEvents {
    fn on_connection(&self, connection: SharedConnection) {
        self.inner.on_connection(connection);
    }

    fn on_disconnection(&self, connection: SharedConnection) {
        if let Some(relay) = self.relay.upgrade() {
            relay.session_closed(connection.id());
        }
        self.inner.on_disconnection(connection);
    }

    fn on_message(&self, connection: SharedConnection, raw: &str) {
        self.inner.on_message(connection, raw);
    }
}

// ============================================================================
// RelayTransport
// ============================================================================

/// Relay transport with discovery-room peer selection.
pub struct RelayTransport {
    inner: Arc<RelayInner>,
}

impl RelayTransport {
    /// Creates a relay transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] or [`Error::Url`] if the options are
    /// invalid.
    pub fn new(options: RelayOptions) -> Result<Self> {
        let base_url = options.validate()?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(RelayInner {
                options,
                base_url,
                registry: Mutex::new(DiscoveryRegistry::new()),
                session: Mutex::new(None),
                events: Mutex::new(None),
                shutdown_tx,
                tasks: Mutex::new(Vec::new()),
                discovery_connected: AtomicBool::new(false),
            }),
        })
    }

    /// Returns the transport options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &RelayOptions {
        &self.inner.options
    }

    /// Returns the current peer selection.
    #[must_use]
    pub fn selection(&self) -> PeerSelection {
        self.inner.registry.lock().selection()
    }

    /// Returns a snapshot of the discovery registry, sorted by peer ID.
    #[must_use]
    pub fn peers(&self) -> Vec<(PeerId, PeerRecord)> {
        self.inner.registry.lock().snapshot()
    }

    /// Returns `true` while the discovery room is joined.
    #[must_use]
    pub fn is_discovery_connected(&self) -> bool {
        self.inner.discovery_connected.load(Ordering::SeqCst)
    }

    /// Returns `true` while a session room is open.
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.inner
            .session
            .lock()
            .as_ref()
            .is_some_and(|proxy| proxy.is_open())
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn start(&self, events: Arc<dyn TransportEvents>) -> Result<()> {
        let mut tasks = self.inner.tasks.lock();
        if !tasks.is_empty() {
            return Err(Error::transport("relay transport already started"));
        }

        *self.inner.events.lock() = Some(events);
        self.inner.shutdown_tx.send_replace(false);

        // Subscribed before spawning so a stop issued right after start is
        // never missed.
        let discovery_rx = self.inner.shutdown_tx.subscribe();
        let sweep_rx = self.inner.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(
            Arc::clone(&self.inner).discovery_loop(discovery_rx),
        ));
        tasks.push(tokio::spawn(Arc::clone(&self.inner).sweep_loop(sweep_rx)));

        info!(
            relay = %self.inner.base_url,
            room = %self.inner.options.discovery_room,
            "Relay transport started"
        );
        Ok(())
    }

    async fn stop(&self) {
        self.inner.shutdown_tx.send_replace(true);

        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Relay task ended abnormally");
            }
        }

        let session = {
            let mut registry = self.inner.registry.lock();
            registry.deselect();
            self.inner.session.lock().take()
        };
        if let Some(proxy) = session {
            proxy.close();
        }

        *self.inner.events.lock() = None;
        info!("Relay transport stopped");
    }

    fn name(&self) -> &'static str {
        "relay"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::testing::RecordingEvents;

    #[test]
    fn test_default_options() {
        let options = RelayOptions::new("wss://relay.example.com/rooms");
        assert_eq!(options.discovery_room, DEFAULT_DISCOVERY_ROOM);
        assert_eq!(options.peer_ttl, Duration::from_secs(30));
        assert_eq!(options.sweep_interval, Duration::from_secs(15));
        assert_eq!(options.reconnect_backoff, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_http() {
        let err = RelayOptions::new("https://relay.example.com").validate().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_validate_rejects_garbage() {
        let err = RelayOptions::new("not a url").validate().unwrap_err();
        assert!(matches!(err, Error::Url(_)));
    }

    #[test]
    fn test_validate_rejects_zero_timing() {
        let options = RelayOptions::new("ws://relay").with_peer_ttl(Duration::ZERO);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_room_url_appends_segment() {
        let base = Url::parse("wss://relay.example.com/rooms").unwrap();
        assert_eq!(
            room_url(&base, "discovery").unwrap().as_str(),
            "wss://relay.example.com/rooms/discovery"
        );

        let base = Url::parse("wss://relay.example.com/rooms/").unwrap();
        assert_eq!(
            room_url(&base, "peer a").unwrap().as_str(),
            "wss://relay.example.com/rooms/peer%20a"
        );

        let base = Url::parse("ws://127.0.0.1:9000").unwrap();
        assert_eq!(
            room_url(&base, "discovery").unwrap().as_str(),
            "ws://127.0.0.1:9000/discovery"
        );
    }

    #[tokio::test]
    async fn test_start_survives_unreachable_relay() {
        // Nothing listens on port 1.
        let transport = RelayTransport::new(
            RelayOptions::new("ws://127.0.0.1:1").with_reconnect_backoff(Duration::from_millis(20)),
        )
        .unwrap();

        transport.start(RecordingEvents::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!transport.is_discovery_connected());
        assert_eq!(transport.selection(), PeerSelection::NoPeers);

        transport.stop().await;
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let transport = RelayTransport::new(RelayOptions::new("ws://127.0.0.1:1")).unwrap();
        transport.start(RecordingEvents::new()).await.unwrap();
        assert!(transport.start(RecordingEvents::new()).await.is_err());
        transport.stop().await;
    }

    #[tokio::test]
    async fn test_stop_right_after_start() {
        let transport = RelayTransport::new(RelayOptions::new("ws://127.0.0.1:1")).unwrap();

        for _ in 0..2 {
            transport.start(RecordingEvents::new()).await.unwrap();
            tokio::time::timeout(Duration::from_secs(5), transport.stop())
                .await
                .expect("stop returns without the loops having run");
            assert!(!transport.is_discovery_connected());
        }
    }

    #[tokio::test]
    async fn test_announce_while_stopped_releases_selection() {
        let transport = RelayTransport::new(RelayOptions::new("ws://127.0.0.1:1")).unwrap();
        transport
            .inner
            .handle_discovery_frame(r#"{"type":"PEER_ANNOUNCE","peerId":"a","displayName":"A"}"#);
        transport.inner.handle_discovery_frame("garbage");
        transport.inner.handle_discovery_frame(r#"{"type":"HANDSHAKE"}"#);

        // Selected at once, released once the session task finds no owner.
        assert_eq!(
            transport.selection(),
            PeerSelection::SessionActive(PeerId::from("a"))
        );
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.selection() != PeerSelection::NoPeers {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("selection released");

        assert_eq!(transport.peers().len(), 1);
        assert!(!transport.has_session());
    }

    #[tokio::test]
    async fn test_eviction_reports_session_close_at_once() {
        use tokio_tungstenite::tungstenite::protocol::Role;

        use crate::transport::WsConnection;
        use crate::transport::testing::Recorded;

        let transport = RelayTransport::new(RelayOptions::new("ws://127.0.0.1:1")).unwrap();
        let events = RecordingEvents::new();
        *transport.inner.events.lock() = Some(events.clone());

        let start = Instant::now();
        {
            let mut registry = transport.inner.registry.lock();
            registry.announce(PeerId::from("a"), "A", start);
            registry.announce(PeerId::from("b"), "B", start + Duration::from_secs(20));
        }

        // Session socket whose driver never runs, so only the sweep can
        // report the close.
        let (stream, _remote) = tokio::io::duplex(1024);
        let ws_stream = WebSocketStream::from_raw_socket(stream, Role::Client, None).await;
        let (connection, _driver) = WsConnection::new(ws_stream);
        let url = room_url(&transport.inner.base_url, "a").unwrap();
        let proxy = Arc::new(SessionProxy::new(
            url,
            PeerId::from("a"),
            "A".to_string(),
            connection,
        ));
        *transport.inner.session.lock() = Some(Arc::clone(&proxy));

        transport.inner.sweep(start + Duration::from_secs(31));

        assert_eq!(events.events(), vec![Recorded::Disconnected(proxy.id())]);
        assert!(!proxy.is_open());
        assert!(!transport.has_session());
        assert!(transport.peers().iter().all(|(id, _)| id.as_str() != "a"));
    }

    #[tokio::test]
    async fn test_sweep_evicts_active_peer_without_session() {
        let transport = RelayTransport::new(RelayOptions::new("ws://127.0.0.1:1")).unwrap();
        transport
            .inner
            .handle_discovery_frame(r#"{"type":"PEER_ANNOUNCE","peerId":"a","displayName":"A"}"#);

        transport
            .inner
            .sweep(Instant::now() + Duration::from_secs(31));

        assert_eq!(transport.selection(), PeerSelection::NoPeers);
        assert!(transport.peers().is_empty());
        assert!(!transport.has_session());
    }
}
