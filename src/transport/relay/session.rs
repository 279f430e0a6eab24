//! Session-room connection proxy.
//!
//! A [`SessionProxy`] is the relay's stand-in for a raw socket: it wraps the
//! WebSocket joined to one peer's session room and exposes the same
//! [`ConnectionHandle`] capability set, so the bridge handles it exactly
//! like a local connection.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, connect_async};
use tracing::debug;
use url::Url;

use crate::error::Result;
use crate::identifiers::{ConnectionId, PeerId};
use crate::transport::connection::SocketDriver;
use crate::transport::{ConnectionHandle, WsConnection};

// ============================================================================
// Types
// ============================================================================

/// I/O half of a session-room socket.
pub(crate) type SessionDriver = SocketDriver<MaybeTlsStream<TcpStream>>;

// ============================================================================
// SessionProxy
// ============================================================================

/// Connection to the session room of one selected peer.
pub struct SessionProxy {
    /// Peer the room belongs to.
    peer_id: PeerId,
    /// Label the peer announced.
    display_name: String,
    /// Room URL.
    url: Url,
    /// Underlying socket.
    connection: WsConnection,
}

impl fmt::Debug for SessionProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionProxy")
            .field("peer_id", &self.peer_id)
            .field("url", &self.url.as_str())
            .field("connection", &self.connection)
            .finish()
    }
}

impl SessionProxy {
    /// Joins the session room at `url`.
    ///
    /// The returned driver must be spawned before frames flow.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`](crate::Error::WebSocket) if the room
    /// cannot be joined.
    pub(crate) async fn connect(
        url: Url,
        peer_id: PeerId,
        display_name: String,
    ) -> Result<(Self, SessionDriver)> {
        let (ws_stream, _) = connect_async(url.as_str()).await?;

        let (connection, driver) = WsConnection::new(ws_stream);
        debug!(peer = %peer_id, connection = %connection.id(), "Session room joined");

        Ok((Self::new(url, peer_id, display_name, connection), driver))
    }

    /// Wraps an already joined session-room socket.
    pub(crate) fn new(
        url: Url,
        peer_id: PeerId,
        display_name: String,
        connection: WsConnection,
    ) -> Self {
        Self {
            peer_id,
            display_name,
            url,
            connection,
        }
    }

    /// Returns the peer this session belongs to.
    #[inline]
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Returns the label the peer announced.
    #[inline]
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Returns the session room URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl ConnectionHandle for SessionProxy {
    fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    fn send(&self, frame: String) -> Result<()> {
        self.connection.send(frame)
    }

    fn close(&self) {
        debug!(peer = %self.peer_id, "Closing session");
        self.connection.close();
    }

    fn is_open(&self) -> bool {
        self.connection.is_open()
    }
}
