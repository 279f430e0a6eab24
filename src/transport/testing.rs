//! In-memory doubles for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;

use super::{ConnectionHandle, SharedConnection, Transport, TransportEvents};

// ============================================================================
// MockConnection
// ============================================================================

/// Connection that records every frame sent to it.
#[derive(Debug)]
pub(crate) struct MockConnection {
    id: ConnectionId,
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl MockConnection {
    pub(crate) fn new() -> Self {
        Self {
            id: ConnectionId::next(),
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub(crate) fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .iter()
            .map(|s| serde_json::from_str(s).expect("sent frames are JSON"))
            .collect()
    }
}

impl ConnectionHandle for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, frame: String) -> Result<()> {
        if !self.is_open() {
            return Err(Error::transport("mock connection closed"));
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    fn close(&self) {
        self.mark_closed();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

// ============================================================================
// RecordingEvents
// ============================================================================

/// Lifecycle event captured by [`RecordingEvents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Recorded {
    Connected(ConnectionId),
    Disconnected(ConnectionId),
    Message(ConnectionId, String),
}

/// Event sink that records everything it is told.
#[derive(Default)]
pub(crate) struct RecordingEvents {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingEvents {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }
}

impl TransportEvents for RecordingEvents {
    fn on_connection(&self, connection: SharedConnection) {
        self.events.lock().push(Recorded::Connected(connection.id()));
    }

    fn on_disconnection(&self, connection: SharedConnection) {
        self.events
            .lock()
            .push(Recorded::Disconnected(connection.id()));
    }

    fn on_message(&self, connection: SharedConnection, raw: &str) {
        self.events
            .lock()
            .push(Recorded::Message(connection.id(), raw.to_owned()));
    }
}

// ============================================================================
// NullTransport
// ============================================================================

/// Transport that never produces connections; tests drive events by hand.
#[derive(Debug, Default)]
pub(crate) struct NullTransport {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl NullTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub(crate) fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for NullTransport {
    async fn start(&self, _events: Arc<dyn TransportEvents>) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "null"
    }
}
