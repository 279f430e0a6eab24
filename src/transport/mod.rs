//! Transport layer.
//!
//! A [`Transport`] moves frames between the bridge and target agents and
//! reports connection lifecycle through [`TransportEvents`]. Which
//! connection becomes the target is decided by the bridge, not here.
//!
//! # Architecture
//!
//! ```text
//!                       ┌──────────────────────┐
//!                       │       Bridge         │
//!                       │  (TransportEvents)   │
//!                       └──────────▲───────────┘
//!          on_connection / on_message / on_disconnection
//!                 ┌────────────────┴────────────────┐
//!        ┌────────┴────────┐              ┌─────────┴─────────┐
//!        │ LocalTransport  │              │  RelayTransport   │
//!        │ ws://host:PORT  │              │ discovery room +  │
//!        │  WsConnection   │              │ session room      │
//!        └─────────────────┘              │  SessionProxy     │
//!                                         └───────────────────┘
//! ```
//!
//! Both connection kinds implement [`ConnectionHandle`], so the bridge
//! cannot tell transports apart.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket connection handle and its I/O loop |
//! | `local` | Point-to-point listening socket |
//! | `relay` | Discovery-based relay transport |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::identifiers::ConnectionId;

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection handle and I/O loop.
pub mod connection;

/// Point-to-point listening socket.
pub mod local;

/// Discovery-based relay transport.
pub mod relay;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::WsConnection;
pub use local::LocalTransport;
pub use relay::{DiscoveryRegistry, PeerSelection, RelayTransport, SessionProxy};

// ============================================================================
// ConnectionHandle
// ============================================================================

/// Capability set of one live connection.
pub trait ConnectionHandle: Send + Sync + fmt::Debug {
    /// Returns the identity of this connection.
    fn id(&self) -> ConnectionId;

    /// Queues one text frame for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`](crate::Error::Transport) if the
    /// connection is already closed.
    fn send(&self, frame: String) -> Result<()>;

    /// Starts closing the connection. Idempotent.
    fn close(&self);

    /// Returns `true` while frames can still be sent.
    fn is_open(&self) -> bool;
}

/// Shared connection handle passed between transport and bridge.
pub type SharedConnection = Arc<dyn ConnectionHandle>;

// ============================================================================
// TransportEvents
// ============================================================================

/// Callbacks a transport fires into its owner.
///
/// Implementations must not block; they run on transport I/O tasks.
pub trait TransportEvents: Send + Sync {
    /// A connection was established.
    fn on_connection(&self, connection: SharedConnection);

    /// A connection closed. Fired exactly once per connection.
    fn on_disconnection(&self, connection: SharedConnection);

    /// A text frame arrived on a connection.
    fn on_message(&self, connection: SharedConnection, raw: &str);
}

// ============================================================================
// Transport
// ============================================================================

/// A source of target connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts the transport, delivering lifecycle events to `events`.
    ///
    /// # Errors
    ///
    /// Fatal startup failures (such as a port already in use) are returned
    /// here. Recoverable failures are retried internally.
    async fn start(&self, events: Arc<dyn TransportEvents>) -> Result<()>;

    /// Stops the transport and closes its connections.
    async fn stop(&self);

    /// Short label used in logs.
    fn name(&self) -> &'static str;
}
