//! Bridge state store.
//!
//! Pure transitions over [`BridgeState`]: target binding, request ID
//! minting, and the pending-request map. Every transition consumes the
//! current state and returns the next one; nothing here performs I/O.
//!
//! The bridge keeps one `BridgeState` behind a mutex and swaps it through
//! these functions, so the pending map is never mutated any other way.
//!
//! # Settlement
//!
//! A [`PendingEntry`] settles by value ([`PendingEntry::resolve`] /
//! [`PendingEntry::reject`] consume it). Whoever removes an entry from the
//! map owns it, which is what guarantees at most one settlement per ID.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rustc_hash::FxHashMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::transport::SharedConnection;

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to pending entries.
type PendingMap = FxHashMap<RequestId, PendingEntry>;

/// Receiving half handed to the caller awaiting a pending entry.
pub type PendingReceiver = oneshot::Receiver<Result<Value>>;

// ============================================================================
// RequestKind
// ============================================================================

/// Which operation created a pending entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// `executeRemote`.
    Execute,
    /// `queryContext`.
    Context,
}

impl RequestKind {
    /// Short label used in logs.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Context => "context",
        }
    }
}

// ============================================================================
// PendingEntry
// ============================================================================

/// Continuation for one in-flight request.
pub struct PendingEntry {
    /// Settles the caller's future.
    settle: oneshot::Sender<Result<Value>>,
    /// Operation that created the entry.
    kind: RequestKind,
    /// When the entry was registered.
    created_at: Instant,
}

impl PendingEntry {
    /// Creates an entry and the receiver its caller awaits.
    #[must_use]
    pub fn new(kind: RequestKind) -> (Self, PendingReceiver) {
        let (settle, rx) = oneshot::channel();
        let entry = Self {
            settle,
            kind,
            created_at: Instant::now(),
        };
        (entry, rx)
    }

    /// Settles the caller with a value.
    ///
    /// A caller that already gave up is ignored.
    pub fn resolve(self, value: Value) {
        let _ = self.settle.send(Ok(value));
    }

    /// Settles the caller with an error.
    pub fn reject(self, error: Error) {
        let _ = self.settle.send(Err(error));
    }

    /// Returns the operation that created this entry.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Returns how long the entry has been pending.
    #[inline]
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl fmt::Debug for PendingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingEntry")
            .field("kind", &self.kind)
            .field("age", &self.age())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// BridgeStats
// ============================================================================

/// Snapshot reported by `getStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    /// Whether a live target is bound.
    pub connected: bool,
    /// Requests currently awaiting a response.
    pub pending_count: usize,
    /// Request IDs minted so far.
    pub total_requests: u64,
    /// Time since the state was created.
    #[serde(rename = "uptimeMs", serialize_with = "serialize_millis")]
    pub uptime: Duration,
}

fn serialize_millis<S: Serializer>(
    value: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

// ============================================================================
// BridgeState
// ============================================================================

/// Connection binding, request counter and pending map of one bridge.
pub struct BridgeState {
    /// Currently bound target, if any.
    target: Option<SharedConnection>,
    /// Number of request IDs minted so far.
    request_counter: u64,
    /// In-flight requests.
    pending: PendingMap,
    /// Creation time.
    started_at: Instant,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeState")
            .field("target", &self.target.as_ref().map(|c| c.id()))
            .field("request_counter", &self.request_counter)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// BridgeState - Transitions
// ============================================================================

impl BridgeState {
    /// Creates the initial state: no target, counter at zero, nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self {
            target: None,
            request_counter: 0,
            pending: PendingMap::default(),
            started_at: Instant::now(),
        }
    }

    /// Binds (or unbinds, with `None`) the target connection.
    ///
    /// A new binding replaces the previous one; the old connection is not
    /// closed.
    #[must_use]
    pub fn with_target(self, target: Option<SharedConnection>) -> Self {
        Self { target, ..self }
    }

    /// Mints the next request ID using the current wall clock.
    #[must_use]
    pub fn next_request_id(self) -> (Self, RequestId) {
        self.next_request_id_at(unix_millis())
    }

    /// Mints the next request ID with an explicit timestamp.
    #[must_use]
    pub fn next_request_id_at(self, stamp: u64) -> (Self, RequestId) {
        let request_counter = self.request_counter + 1;
        let id = RequestId::new(request_counter, stamp);
        (
            Self {
                request_counter,
                ..self
            },
            id,
        )
    }

    /// Registers a pending entry.
    #[must_use]
    pub fn add_pending(mut self, id: RequestId, entry: PendingEntry) -> Self {
        self.pending.insert(id, entry);
        self
    }

    /// Removes a pending entry.
    ///
    /// Unknown IDs yield `None` and leave the state untouched.
    #[must_use]
    pub fn remove_pending(mut self, id: &RequestId) -> (Self, Option<PendingEntry>) {
        let entry = self.pending.remove(id);
        (self, entry)
    }

    /// Drains every pending entry.
    #[must_use]
    pub fn clear_pending(mut self) -> (Self, Vec<(RequestId, PendingEntry)>) {
        let drained = self.pending.drain().collect();
        (self, drained)
    }
}

// ============================================================================
// BridgeState - Queries
// ============================================================================

impl BridgeState {
    /// Returns `true` if a target is bound and its connection is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.target.as_ref().is_some_and(|c| c.is_open())
    }

    /// Returns the bound target, if any.
    #[inline]
    #[must_use]
    pub fn target(&self) -> Option<&SharedConnection> {
        self.target.as_ref()
    }

    /// Returns `true` if `id` is pending.
    #[inline]
    #[must_use]
    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id)
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns a statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            connected: self.is_connected(),
            pending_count: self.pending.len(),
            total_requests: self.request_counter,
            uptime: self.started_at.elapsed(),
        }
    }
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use proptest::prelude::*;

    use crate::transport::ConnectionHandle;
    use crate::transport::testing::MockConnection;

    #[test]
    fn test_initial_state() {
        let state = BridgeState::new();
        assert!(!state.is_connected());
        assert_eq!(state.pending_count(), 0);

        let stats = state.stats();
        assert!(!stats.connected);
        assert_eq!(stats.total_requests, 0);
    }

    #[test]
    fn test_target_binding_follows_connection_liveness() {
        let conn = Arc::new(MockConnection::new());
        let state = BridgeState::new().with_target(Some(conn.clone()));
        assert!(state.is_connected());

        conn.mark_closed();
        assert!(!state.is_connected());

        let state = state.with_target(None);
        assert!(state.target().is_none());
    }

    #[test]
    fn test_new_binding_supersedes_old() {
        let first = Arc::new(MockConnection::new());
        let second = Arc::new(MockConnection::new());

        let state = BridgeState::new()
            .with_target(Some(first.clone()))
            .with_target(Some(second.clone()));

        assert_eq!(state.target().map(|c| c.id()), Some(second.id()));
        assert!(first.is_open());
    }

    #[test]
    fn test_request_ids_increase() {
        let state = BridgeState::new();
        let (state, a) = state.next_request_id_at(100);
        let (state, b) = state.next_request_id_at(100);
        let (state, c) = state.next_request_id_at(50);

        assert!(a < b && b < c);
        assert_eq!(state.stats().total_requests, 3);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let (entry, _rx) = PendingEntry::new(RequestKind::Execute);
        let (state, id) = BridgeState::new().next_request_id();
        let state = state.add_pending(id, entry);

        let (state, missing) = state.remove_pending(&RequestId::new(999, 0));
        assert!(missing.is_none());
        assert_eq!(state.pending_count(), 1);
        assert!(state.is_pending(&id));
    }

    #[tokio::test]
    async fn test_remove_then_settle_once() {
        let (entry, rx) = PendingEntry::new(RequestKind::Execute);
        let (state, id) = BridgeState::new().next_request_id();
        let state = state.add_pending(id, entry);

        let (state, entry) = state.remove_pending(&id);
        entry.expect("entry present").resolve(Value::from(2));

        let (state, again) = state.remove_pending(&id);
        assert!(again.is_none());
        assert_eq!(state.pending_count(), 0);
        assert_eq!(rx.await.unwrap().unwrap(), Value::from(2));
    }

    #[tokio::test]
    async fn test_clear_pending_drains_all() {
        let mut state = BridgeState::new();
        let mut receivers = Vec::new();

        for _ in 0..5 {
            let (entry, rx) = PendingEntry::new(RequestKind::Context);
            let (next, id) = state.next_request_id();
            state = next.add_pending(id, entry);
            receivers.push(rx);
        }

        let (state, drained) = state.clear_pending();
        assert_eq!(drained.len(), 5);
        assert_eq!(state.pending_count(), 0);

        for (_, entry) in drained {
            entry.reject(Error::TargetDisconnected);
        }
        for rx in receivers {
            assert!(matches!(rx.await.unwrap(), Err(Error::TargetDisconnected)));
        }
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let json = serde_json::to_value(BridgeState::new().stats()).unwrap();
        assert_eq!(json["connected"], false);
        assert_eq!(json["pendingCount"], 0);
        assert_eq!(json["totalRequests"], 0);
        assert!(json["uptimeMs"].is_u64());
    }

    proptest! {
        #[test]
        fn prop_request_ids_strictly_increasing(stamps in prop::collection::vec(any::<u64>(), 1..200)) {
            let mut state = BridgeState::new();
            let mut previous: Option<RequestId> = None;
            let mut seen = std::collections::HashSet::new();

            for stamp in stamps {
                let (next, id) = state.next_request_id_at(stamp);
                state = next;
                if let Some(prev) = previous {
                    prop_assert!(id > prev);
                }
                prop_assert!(seen.insert(id.to_string()));
                previous = Some(id);
            }
        }
    }
}
