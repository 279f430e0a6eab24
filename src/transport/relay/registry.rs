//! Discovery registry and peer selection.
//!
//! Tracks which target agents have announced themselves in the discovery
//! room and which one currently holds the session.
//!
//! # Peer Selection
//!
//! ```text
//!            first announce                 active peer evicted
//!  NoPeers ─────────────────► SessionActive ─────────────────────► NoPeers
//!     ▲                        (peer)                                 │
//!     │                                                               │ freshest
//!     │                                                               │ remaining peer
//!     └── session released ◄──── SessionActive(next) ◄────────────────┘
//! ```
//!
//! First-seen wins: later announces from other peers are recorded but do
//! not move the session. There is no priority rule beyond arrival order.
//!
//! The active peer is always a key of the registry; evicting it clears the
//! selection in the same call.

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::identifiers::PeerId;

// ============================================================================
// PeerRecord
// ============================================================================

/// What the registry knows about one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Label from the latest announce.
    pub display_name: String,
    /// Time of the latest announce.
    pub last_seen: Instant,
}

// ============================================================================
// PeerSelection
// ============================================================================

/// Peer-selection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerSelection {
    /// No session is open or being opened.
    NoPeers,
    /// A session is open (or opening) to this peer.
    SessionActive(PeerId),
}

// ============================================================================
// SweepOutcome
// ============================================================================

/// Result of one stale sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Peers removed from the registry, sorted.
    pub evicted: Vec<PeerId>,
    /// Active peer whose session must be torn down.
    pub closed: Option<PeerId>,
    /// Peer selected to replace it.
    pub opened: Option<PeerId>,
}

// ============================================================================
// DiscoveryRegistry
// ============================================================================

/// Announced peers and the active selection.
#[derive(Debug, Default)]
pub struct DiscoveryRegistry {
    /// Announced peers.
    peers: FxHashMap<PeerId, PeerRecord>,
    /// Peer holding the session.
    active: Option<PeerId>,
}

impl DiscoveryRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records or refreshes an announce.
    ///
    /// Returns the peer to open a session to when this announce moved the
    /// selection out of [`PeerSelection::NoPeers`].
    pub fn announce(
        &mut self,
        peer_id: PeerId,
        display_name: impl Into<String>,
        now: Instant,
    ) -> Option<PeerId> {
        self.peers.insert(
            peer_id.clone(),
            PeerRecord {
                display_name: display_name.into(),
                last_seen: now,
            },
        );

        if self.active.is_none() {
            self.active = Some(peer_id.clone());
            return Some(peer_id);
        }

        None
    }

    /// Evicts peers not seen for longer than `ttl`.
    ///
    /// If the active peer is evicted the selection falls back to
    /// [`PeerSelection::NoPeers`] and the freshest remaining peer, if any,
    /// is selected at once.
    pub fn sweep(&mut self, now: Instant, ttl: Duration) -> SweepOutcome {
        let mut evicted: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, record)| now.saturating_duration_since(record.last_seen) > ttl)
            .map(|(peer_id, _)| peer_id.clone())
            .collect();
        evicted.sort();

        for peer_id in &evicted {
            self.peers.remove(peer_id);
        }

        let closed = self
            .active
            .take_if(|active| !self.peers.contains_key(active));

        let opened = if closed.is_some() {
            self.select_freshest()
        } else {
            None
        };

        SweepOutcome {
            evicted,
            closed,
            opened,
        }
    }

    /// Clears the selection if `peer_id` holds it.
    ///
    /// Used when the session to that peer failed or was closed by the
    /// relay. The peer stays registered; the next announce re-selects.
    pub fn release(&mut self, peer_id: &PeerId) -> bool {
        self.active.take_if(|active| active == peer_id).is_some()
    }

    /// Clears the selection unconditionally.
    pub fn deselect(&mut self) -> Option<PeerId> {
        self.active.take()
    }

    /// Returns the current selection state.
    #[must_use]
    pub fn selection(&self) -> PeerSelection {
        match &self.active {
            Some(peer_id) => PeerSelection::SessionActive(peer_id.clone()),
            None => PeerSelection::NoPeers,
        }
    }

    /// Returns the active peer, if any.
    #[inline]
    #[must_use]
    pub fn active(&self) -> Option<&PeerId> {
        self.active.as_ref()
    }

    /// Returns the record for a peer.
    #[inline]
    #[must_use]
    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    /// Returns the number of registered peers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns `true` if no peer is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Returns a snapshot of all peers, sorted by ID.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(PeerId, PeerRecord)> {
        let mut peers: Vec<_> = self
            .peers
            .iter()
            .map(|(peer_id, record)| (peer_id.clone(), record.clone()))
            .collect();
        peers.sort_by(|a, b| a.0.cmp(&b.0));
        peers
    }

    /// Selects the most recently seen peer.
    fn select_freshest(&mut self) -> Option<PeerId> {
        let next = self
            .peers
            .iter()
            .max_by(|a, b| a.1.last_seen.cmp(&b.1.last_seen).then_with(|| b.0.cmp(a.0)))
            .map(|(peer_id, _)| peer_id.clone())?;

        self.active = Some(next.clone());
        Some(next)
    }
}

// ============================================================================
// Tests
// ============================================================================
