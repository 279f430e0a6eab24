//! Error types for the agent bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use agent_bridge::{Bridge, Error, Result};
//!
//! async fn example(bridge: &Bridge) -> Result<()> {
//!     match bridge.execute_remote("1 + 1").await {
//!         Ok(outcome) => println!("{}", outcome.result),
//!         Err(Error::NotConnected) => println!("no target bound"),
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::NotConnected`], [`Error::TargetDisconnected`], [`Error::Transport`] |
//! | Request | [`Error::RequestTimeout`], [`Error::RemoteExecution`], [`Error::PendingLimit`] |
//! | Protocol | [`Error::Protocol`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when an option or environment variable is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// No target agent is bound.
    ///
    /// Returned immediately, before any request ID is minted or frame sent.
    #[error("No target connected")]
    NotConnected,

    /// The bound target went away while the request was pending.
    #[error("Target disconnected")]
    TargetDisconnected,

    /// Connection-layer failure (bind, accept, upgrade, send).
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// No response arrived within the request window.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The target reported a failure.
    #[error("Remote execution failed: {message}")]
    RemoteExecution {
        /// Error message reported by the target.
        message: String,
        /// Stack trace reported by the target, if any.
        stack: Option<String>,
    },

    /// Too many outstanding requests.
    ///
    /// Only returned when a pending cap is configured.
    #[error("Too many pending requests (limit {limit})")]
    PendingLimit {
        /// Configured cap.
        limit: usize,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Frame could not be parsed.
    ///
    /// Logged and dropped by the bridge; never surfaced to a caller.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Relay URL could not be parsed.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a remote execution error.
    #[inline]
    pub fn remote_execution(message: impl Into<String>, stack: Option<String>) -> Self {
        Self::RemoteExecution {
            message: message.into(),
            stack,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::TargetDisconnected
                | Self::Transport { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry once a target is bound again.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::TargetDisconnected
                | Self::RequestTimeout { .. }
                | Self::PendingLimit { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
