//! Bridge facade and correlation core.
//!
//! [`Bridge`] is what agent tooling talks to. It owns one transport and one
//! [`BridgeState`], turns calls into correlated request frames and settles
//! them when the matching response arrives.
//!
//! # Request Lifecycle
//!
//! ```text
//! execute_remote / query_context
//!   │
//!   ├─ no live target ────────────────► Err(NotConnected)   (no ID minted)
//!   ├─ pending cap reached ───────────► Err(PendingLimit)
//!   │
//!   ├─ mint RequestId, register PendingEntry, send frame
//!   │
//!   ├─ matching response ─────────────► Ok(result) / Err(RemoteExecution)
//!   ├─ timer fires while pending ─────► Err(RequestTimeout)
//!   └─ target closes while pending ───► Err(TargetDisconnected)
//! ```
//!
//! Exactly one of these settles each entry: whichever path removes the
//! entry from the pending map settles it. Every state change goes through
//! one pure [`BridgeState`] transition under the state lock.

// ============================================================================
// Imports
// ============================================================================

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, RequestId};
use crate::protocol::{self, Frame};
use crate::state::{BridgeState, BridgeStats, PendingEntry, RequestKind};
use crate::transport::{SharedConnection, Transport, TransportEvents};

use super::builder::BridgeBuilder;
use super::options::{BridgeConfig, BridgeOptions};

// ============================================================================
// ExecutionOutcome
// ============================================================================

/// Successful result of [`Bridge::execute_remote`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    /// Always `true`; failures are returned as errors.
    pub success: bool,
    /// Value the script produced (`null` if none).
    pub result: Value,
}

// ============================================================================
// Bridge
// ============================================================================

/// Request/response bridge to one remote target agent.
///
/// Cheap to clone; clones share the same state and transport.
///
/// # Example
///
/// ```ignore
/// use agent_bridge::Bridge;
///
/// let bridge = Bridge::builder().port(9223).build()?;
/// bridge.start().await?;
///
/// let outcome = bridge.execute_remote("return document.title").await?;
/// println!("{}", outcome.result);
/// ```
#[derive(Clone)]
pub struct Bridge {
    /// Shared correlation state; also the transport's event sink.
    core: Arc<BridgeCore>,
    /// Source of target connections.
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("transport", &self.transport.name())
            .field("options", &self.core.options)
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Creates a bridge over `transport`.
    ///
    /// Nothing is started until [`Bridge::start`].
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, options: BridgeOptions) -> Self {
        Self {
            core: Arc::new(BridgeCore::new(options)),
            transport,
        }
    }

    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    /// Creates a bridge from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] or [`Error::Url`] for invalid options.
    pub fn from_config(config: BridgeConfig) -> Result<Self> {
        config.bridge.validate()?;
        let transport = config.transport.build()?;
        Ok(Self::new(transport, config.bridge))
    }

    /// Creates a bridge from `AGENT_BRIDGE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_config(BridgeConfig::from_env()?)
    }

    /// Starts the transport.
    ///
    /// # Errors
    ///
    /// Returns the transport's fatal startup error, such as
    /// [`Error::Transport`] when the port is already in use.
    pub async fn start(&self) -> Result<()> {
        let events: Arc<dyn TransportEvents> = self.core.clone();
        self.transport.start(events).await?;
        info!(transport = self.transport.name(), "Bridge started");
        Ok(())
    }

    /// Stops the transport and rejects every pending request with
    /// [`Error::TargetDisconnected`].
    pub async fn stop(&self) {
        self.transport.stop().await;
        let rejected = self.core.detach();
        info!(
            transport = self.transport.name(),
            rejected, "Bridge stopped"
        );
    }

    /// Runs `script` on the target and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no live target is bound
    /// - [`Error::PendingLimit`] if the pending cap is reached
    /// - [`Error::Transport`] if the frame cannot be sent
    /// - [`Error::RemoteExecution`] if the target reports failure
    /// - [`Error::RequestTimeout`] if no result arrives in time
    /// - [`Error::TargetDisconnected`] if the target goes away first
    pub async fn execute_remote(&self, script: &str) -> Result<ExecutionOutcome> {
        let result = self
            .core
            .request(RequestKind::Execute, self.core.options.execute_timeout, |id| {
                protocol::encode_execute(id, script)
            })
            .await?;

        Ok(ExecutionOutcome {
            success: true,
            result,
        })
    }

    /// Asks the target for its current context document.
    ///
    /// # Errors
    ///
    /// Same as [`Bridge::execute_remote`], with the context timeout.
    pub async fn query_context(&self) -> Result<Value> {
        self.core
            .request(
                RequestKind::Context,
                self.core.options.context_timeout,
                protocol::encode_context_request,
            )
            .await
    }

    /// Sends a fire-and-forget notification to the target.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no live target is bound
    /// - [`Error::Transport`] if the frame cannot be sent
    pub fn notify(&self, message: &str, timeout_ms: u64) -> Result<()> {
        let target = self.core.live_target().ok_or(Error::NotConnected)?;
        target.send(protocol::encode_notify(message, timeout_ms)?)?;
        debug!(connection = %target.id(), "Notification sent");
        Ok(())
    }

    /// Returns `true` if a live target is bound.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.core.state.lock().is_connected()
    }

    /// Returns a status snapshot.
    #[inline]
    #[must_use]
    pub fn status(&self) -> BridgeStats {
        self.core.state.lock().stats()
    }

    /// Returns the transport's label.
    #[inline]
    #[must_use]
    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Returns the request-level options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &BridgeOptions {
        &self.core.options
    }
}

// ============================================================================
// BridgeCore
// ============================================================================

/// State shared between the facade and transport callbacks.
struct BridgeCore {
    state: Mutex<BridgeState>,
    options: BridgeOptions,
}

impl BridgeCore {
    fn new(options: BridgeOptions) -> Self {
        Self {
            state: Mutex::new(BridgeState::new()),
            options,
        }
    }

    /// Applies one state transition atomically.
    fn transition<R>(&self, f: impl FnOnce(BridgeState) -> (BridgeState, R)) -> R {
        let mut guard = self.state.lock();
        let (next, output) = f(mem::take(&mut *guard));
        *guard = next;
        output
    }

    /// Removes a pending entry; the caller now owns its settlement.
    fn take_pending(&self, request_id: &RequestId) -> Option<PendingEntry> {
        self.transition(|state| state.remove_pending(request_id))
    }

    /// Returns the bound target if it is still open.
    fn live_target(&self) -> Option<SharedConnection> {
        self.state
            .lock()
            .target()
            .filter(|target| target.is_open())
            .cloned()
    }

    /// Unbinds the target and rejects everything pending.
    ///
    /// Returns the number of rejected requests.
    fn detach(&self) -> usize {
        let drained = self.transition(|state| state.with_target(None).clear_pending());
        Self::reject_all(drained)
    }

    /// Unbinds the target only if it is still `id`.
    ///
    /// Returns the number of rejected requests, or `None` if another
    /// connection is bound.
    fn detach_if_target(&self, id: ConnectionId) -> Option<usize> {
        let drained = self.transition(|state| {
            if state.target().map(|t| t.id()) != Some(id) {
                return (state, None);
            }
            let (state, drained) = state.with_target(None).clear_pending();
            (state, Some(drained))
        });
        drained.map(Self::reject_all)
    }

    fn reject_all(drained: Vec<(RequestId, PendingEntry)>) -> usize {
        let count = drained.len();
        for (request_id, entry) in drained {
            debug!(%request_id, kind = entry.kind().as_str(), "Rejecting pending request");
            entry.reject(Error::TargetDisconnected);
        }
        count
    }

    /// Sends one correlated request and waits for its settlement.
    async fn request<F>(&self, kind: RequestKind, window: Duration, encode: F) -> Result<Value>
    where
        F: FnOnce(RequestId) -> Result<String>,
    {
        let (entry, mut rx) = PendingEntry::new(kind);
        let max_pending = self.options.max_pending;

        let admitted: Result<(RequestId, SharedConnection)> = self.transition(|state| {
            let target = state.target().filter(|t| t.is_open()).cloned();
            let Some(target) = target else {
                return (state, Err(Error::NotConnected));
            };
            if let Some(limit) = max_pending
                && state.pending_count() >= limit
            {
                return (state, Err(Error::PendingLimit { limit }));
            }
            let (state, request_id) = state.next_request_id();
            (state.add_pending(request_id, entry), Ok((request_id, target)))
        });
        let (request_id, target) = admitted?;

        // Removes the entry if this future is dropped or fails before
        // settlement.
        let _slot = PendingSlot {
            core: self,
            request_id,
        };

        target.send(encode(request_id)?)?;
        debug!(
            %request_id,
            kind = kind.as_str(),
            connection = %target.id(),
            "Request sent"
        );

        match timeout(window, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::TargetDisconnected),
            Err(_) => {
                if let Some(entry) = self.take_pending(&request_id) {
                    let timeout_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
                    warn!(%request_id, kind = kind.as_str(), timeout_ms, "Request timed out");
                    entry.reject(Error::request_timeout(request_id, timeout_ms));
                }
                // Either our rejection or a response that won the race.
                rx.await.unwrap_or(Err(Error::TargetDisconnected))
            }
        }
    }

    /// Binds `connection` as the target.
    fn bind(&self, connection: SharedConnection, name: Option<&str>) {
        let id = connection.id();
        let previous = self.transition(|state| {
            let previous = state.target().map(|t| t.id());
            (state.with_target(Some(connection)), previous)
        });

        match previous {
            Some(previous) if previous != id => {
                info!(connection = %id, %previous, name, "Target superseded by new handshake");
            }
            _ => info!(connection = %id, name, "Target bound"),
        }
    }

    /// Settles the entry for `request_id`, if it is still pending.
    fn settle(&self, request_id: RequestId, outcome: Result<Value>) {
        let Some(entry) = self.take_pending(&request_id) else {
            debug!(%request_id, "Response for unknown or settled request ignored");
            return;
        };

        debug!(
            %request_id,
            kind = entry.kind().as_str(),
            ok = outcome.is_ok(),
            "Request settled"
        );
        match outcome {
            Ok(value) => entry.resolve(value),
            Err(e) => entry.reject(e),
        }
    }
}

impl TransportEvents for BridgeCore {
    fn on_connection(&self, connection: SharedConnection) {
        debug!(connection = %connection.id(), "Connection opened, awaiting handshake");
    }

    fn on_disconnection(&self, connection: SharedConnection) {
        let id = connection.id();
        match self.detach_if_target(id) {
            Some(rejected) => warn!(connection = %id, rejected, "Target disconnected"),
            None => debug!(connection = %id, "Non-target connection closed"),
        }
    }

    fn on_message(&self, connection: SharedConnection, raw: &str) {
        let frame = match protocol::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection = %connection.id(), error = %e, "Dropping malformed frame");
                return;
            }
        };

        match frame {
            Frame::Handshake { name } => self.bind(connection, name.as_deref()),

            Frame::ExecutionResult {
                request_id,
                success,
                result,
                error,
            } => {
                let outcome = if success {
                    Ok(result.unwrap_or(Value::Null))
                } else {
                    Err(error.map_or_else(
                        || Error::remote_execution("remote execution failed", None),
                        Error::from,
                    ))
                };
                self.settle(request_id, outcome);
            }

            Frame::ContextResponse {
                request_id,
                context,
                error,
            } => {
                let outcome = match error {
                    Some(error) => Err(Error::from(error)),
                    None => Ok(context.unwrap_or(Value::Null)),
                };
                self.settle(request_id, outcome);
            }

            Frame::Unknown { kind } => {
                warn!(connection = %connection.id(), ?kind, "Unknown frame type ignored");
            }

            other => {
                debug!(connection = %connection.id(), kind = other.kind(), "Unexpected frame ignored");
            }
        }
    }
}

// ============================================================================
// PendingSlot
// ============================================================================

/// Drops a request's pending entry when its caller goes away.
struct PendingSlot<'a> {
    core: &'a BridgeCore,
    request_id: RequestId,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if self.core.take_pending(&self.request_id).is_some() {
            debug!(request_id = %self.request_id, "Abandoned request removed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
