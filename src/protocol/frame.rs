//! Wire frames and inbound classification.
//!
//! Inbound text goes through two steps:
//!
//! 1. [`parse_frame`] - JSON syntax check, fails with [`Error::Protocol`]
//! 2. [`classify`] - shape check, anything unrecognized becomes
//!    [`Frame::Unknown`]
//!
//! Neither step panics.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::{PeerId, RequestId};

// ============================================================================
// Frame
// ============================================================================

/// A message exchanged with a target agent or the discovery room.
///
/// # Format
///
/// ```json
/// { "type": "EXECUTION_RESULT", "requestId": "4-1700000000000", "success": true, "result": 2 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Frame {
    /// A connection claims (or asks for) the target binding.
    Handshake {
        /// Optional label of the sender.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Run a script on the target.
    ExecuteCommand {
        /// Correlation ID.
        request_id: RequestId,
        /// Work-unit body, opaque to the bridge.
        script: String,
    },

    /// Outcome of an `ExecuteCommand`.
    ExecutionResult {
        /// Correlation ID.
        request_id: RequestId,
        /// Whether the script succeeded.
        success: bool,
        /// Script result on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Failure details.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
    },

    /// Ask the target for its current context.
    ContextRequest {
        /// Correlation ID.
        request_id: RequestId,
    },

    /// Answer to a `ContextRequest`.
    ContextResponse {
        /// Correlation ID.
        request_id: RequestId,
        /// Context document on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
        /// Failure details.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
    },

    /// Fire-and-forget message shown by the target.
    Notify {
        /// Text to show.
        message: String,
        /// How long to show it.
        timeout_ms: u64,
    },

    /// Presence beacon posted to the discovery room.
    PeerAnnounce {
        /// Announcing peer.
        peer_id: PeerId,
        /// Human-readable label.
        #[serde(default)]
        display_name: String,
    },

    /// Valid JSON object of no known shape.
    #[serde(skip)]
    Unknown {
        /// The `type` field, if there was one.
        kind: Option<String>,
    },
}

impl Frame {
    /// Returns the correlation ID carried by this frame, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::ExecuteCommand { request_id, .. }
            | Self::ExecutionResult { request_id, .. }
            | Self::ContextRequest { request_id }
            | Self::ContextResponse { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }

    /// Returns the wire tag of this frame.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Handshake { .. } => "HANDSHAKE",
            Self::ExecuteCommand { .. } => "EXECUTE_COMMAND",
            Self::ExecutionResult { .. } => "EXECUTION_RESULT",
            Self::ContextRequest { .. } => "CONTEXT_REQUEST",
            Self::ContextResponse { .. } => "CONTEXT_RESPONSE",
            Self::Notify { .. } => "NOTIFY",
            Self::PeerAnnounce { .. } => "PEER_ANNOUNCE",
            Self::Unknown { kind } => kind.as_deref().unwrap_or("<untyped>"),
        }
    }
}

// ============================================================================
// RemoteError
// ============================================================================

/// Failure reported by the target.
///
/// Accepts either a bare string or `{ "message", "stack" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteError {
    /// Plain message.
    Message(String),
    /// Message with optional stack trace.
    Detailed {
        /// Error message.
        message: String,
        /// Stack trace.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
}

impl RemoteError {
    /// Returns the error message.
    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Message(message) | Self::Detailed { message, .. } => message,
        }
    }

    /// Returns the stack trace, if reported.
    #[inline]
    #[must_use]
    pub fn stack(&self) -> Option<&str> {
        match self {
            Self::Message(_) => None,
            Self::Detailed { stack, .. } => stack.as_deref(),
        }
    }
}

impl From<RemoteError> for Error {
    fn from(value: RemoteError) -> Self {
        match value {
            RemoteError::Message(message) => Error::remote_execution(message, None),
            RemoteError::Detailed { message, stack } => Error::remote_execution(message, stack),
        }
    }
}

// ============================================================================
// RawFrame
// ============================================================================

/// A syntactically valid inbound frame that has not been classified yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame(Map<String, Value>);

impl RawFrame {
    /// Returns the `type` field, if it is a string.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parses inbound text into a [`RawFrame`].
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the text is not a JSON object.
pub fn parse_frame(raw: &str) -> Result<RawFrame> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::protocol(format!("invalid JSON frame: {e}")))?;

    match value {
        Value::Object(map) => Ok(RawFrame(map)),
        other => Err(Error::protocol(format!(
            "frame is not a JSON object: {}",
            json_type_name(&other)
        ))),
    }
}

/// Routes a parsed frame to its variant.
///
/// Unknown tags, missing fields and malformed request IDs all yield
/// [`Frame::Unknown`].
#[must_use]
pub fn classify(raw: RawFrame) -> Frame {
    let kind = raw.kind().map(str::to_owned);
    serde_json::from_value(Value::Object(raw.0)).unwrap_or(Frame::Unknown { kind })
}

/// Convenience for [`parse_frame`] followed by [`classify`].
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the text is not a JSON object.
pub fn decode(raw: &str) -> Result<Frame> {
    parse_frame(raw).map(classify)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Tests
// ============================================================================
