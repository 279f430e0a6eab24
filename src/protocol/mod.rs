//! Wire protocol between the bridge and target agents.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `HANDSHAKE` | both | Claim the target binding |
//! | `EXECUTE_COMMAND` | Bridge → Target | Run a work unit |
//! | `EXECUTION_RESULT` | Target → Bridge | Work unit outcome |
//! | `CONTEXT_REQUEST` | Bridge → Target | Ask for current context |
//! | `CONTEXT_RESPONSE` | Target → Bridge | Context or error |
//! | `NOTIFY` | Bridge → Target | Fire-and-forget message |
//! | `PEER_ANNOUNCE` | Target → Discovery room | Presence beacon |
//!
//! Every frame is one JSON object per WebSocket text message, tagged by
//! `type`, with camelCase fields.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame types, parsing and classification |
//! | `encode` | Outbound frame builders |

// ============================================================================
// Submodules
// ============================================================================

/// Frame types, parsing and classification.
pub mod frame;

/// Outbound frame builders.
pub mod encode;

// ============================================================================
// Re-exports
// ============================================================================

pub use encode::{
    encode_context_request, encode_execute, encode_frame, encode_handshake, encode_notify,
};
pub use frame::{Frame, RawFrame, RemoteError, classify, decode, parse_frame};
