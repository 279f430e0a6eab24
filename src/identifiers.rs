//! Type-safe identifiers.
//!
//! Newtype wrappers keep request IDs, connection IDs and relay peer IDs
//! from being mixed up.
//!
//! | Type | Source | Wire form |
//! |------|--------|-----------|
//! | [`RequestId`] | minted by [`BridgeState`](crate::state::BridgeState) | `"<counter>-<unix-millis>"` |
//! | [`ConnectionId`] | process-wide counter | not sent |
//! | [`PeerId`] | chosen by the target agent | opaque string |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::result::Result as StdResult;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

// ============================================================================
// RequestId
// ============================================================================

/// Correlation ID for one outbound command.
///
/// Combines the bridge's monotonic counter with a wall-clock timestamp so
/// IDs stay unique across process restarts, where the counter starts over.
/// Ordering follows the counter first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId {
    seq: u64,
    stamp: u64,
}

impl RequestId {
    /// Creates a request ID from its parts.
    #[inline]
    #[must_use]
    pub const fn new(seq: u64, stamp: u64) -> Self {
        Self { seq, stamp }
    }

    /// Returns the counter component.
    #[inline]
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Returns the timestamp component (milliseconds since the Unix epoch).
    #[inline]
    #[must_use]
    pub const fn stamp(&self) -> u64 {
        self.stamp
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.seq, self.stamp)
    }
}

impl FromStr for RequestId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (seq, stamp) = s
            .split_once('-')
            .ok_or_else(|| Error::protocol(format!("malformed request id: {s}")))?;

        let seq = seq
            .parse()
            .map_err(|_| Error::protocol(format!("malformed request id: {s}")))?;
        let stamp = stamp
            .parse()
            .map_err(|_| Error::protocol(format!("malformed request id: {s}")))?;

        Ok(Self { seq, stamp })
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> StdResult<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> StdResult<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// ConnectionId
// ============================================================================

/// Counter for connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one live connection handle.
///
/// Used by the bridge to tell whether a closing connection is the bound
/// target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next process-unique connection ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// PeerId
// ============================================================================

/// Identity a target agent announces in the discovery room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wraps a peer identifier.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
