//! Agent Bridge - request/response correlation over WebSocket.
//!
//! Lets agent tooling run scripts on, and read context from, a remote
//! target agent that is only reachable through a WebSocket.
//!
//! # Architecture
//!
//! - **Bridge (Rust)**: mints request IDs, tracks pending requests,
//!   enforces timeouts and settles each request exactly once
//! - **Target agent (remote)**: claims the bridge with a `HANDSHAKE`,
//!   answers `EXECUTE_COMMAND` and `CONTEXT_REQUEST` frames
//!
//! Two transports deliver target connections:
//!
//! - [`LocalTransport`]: the target connects to `ws://127.0.0.1:9223`
//! - [`RelayTransport`]: targets announce themselves in a relay discovery
//!   room; the bridge joins the session room of the first peer seen and
//!   fails over when it goes silent
//!
//! # Quick Start
//!
//! ```no_run
//! use agent_bridge::{Bridge, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bridge = Bridge::from_env()?;
//!     bridge.start().await?;
//!
//!     let outcome = bridge.execute_remote("return 1 + 1").await?;
//!     println!("result: {}", outcome.result);
//!
//!     bridge.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | Facade, builder and configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Request, connection and peer IDs |
//! | [`protocol`] | Wire frames |
//! | [`state`] | Pure correlation state |
//! | [`transport`] | Local and relay transports |

// ============================================================================
// Modules
// ============================================================================

/// Bridge facade, builder and configuration.
///
/// Use [`Bridge::builder()`] or [`Bridge::from_env()`] to create one.
pub mod bridge;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire frames and their JSON encoding.
pub mod protocol;

/// Correlation state and pending-request bookkeeping.
pub mod state;

/// WebSocket transports.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge types
pub use bridge::{Bridge, BridgeBuilder, BridgeConfig, BridgeOptions, ExecutionOutcome, TransportConfig};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, PeerId, RequestId};

// State types
pub use state::{BridgeState, BridgeStats, PendingEntry, RequestKind};

// Transport types
pub use transport::local::LocalOptions;
pub use transport::relay::RelayOptions;
pub use transport::{
    ConnectionHandle, LocalTransport, PeerSelection, RelayTransport, SharedConnection, Transport,
    TransportEvents,
};
