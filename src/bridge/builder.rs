//! Builder pattern for bridge configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use agent_bridge::Bridge;
//!
//! # fn example() -> agent_bridge::Result<()> {
//! let bridge = Bridge::builder()
//!     .relay("wss://relay.example.com/rooms")
//!     .discovery_room("team-42")
//!     .execute_timeout(Duration::from_secs(60))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::transport::local::LocalOptions;
use crate::transport::relay::RelayOptions;

use super::core::Bridge;
use super::options::{BridgeOptions, TransportConfig};

// ============================================================================
// BridgeBuilder
// ============================================================================

/// Builder for configuring a [`Bridge`].
///
/// Use [`Bridge::builder()`] to create one. Without any transport setter
/// the bridge listens locally on the default port.
#[derive(Default)]
pub struct BridgeBuilder {
    /// Request-level options.
    options: BridgeOptions,
    /// Transport to build.
    transport: TransportConfig,
    /// Pre-built transport, overrides `transport`.
    custom: Option<Arc<dyn Transport>>,
}

impl std::fmt::Debug for BridgeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeBuilder")
            .field("options", &self.options)
            .field("transport", &self.transport)
            .field("custom", &self.custom.as_ref().map(|t| t.name()))
            .finish()
    }
}

// ============================================================================
// BridgeBuilder Implementation
// ============================================================================

impl BridgeBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Listens locally with the given options.
    #[inline]
    #[must_use]
    pub fn local(mut self, options: LocalOptions) -> Self {
        self.transport = TransportConfig::Local(options);
        self
    }

    /// Listens locally on `port`.
    ///
    /// Keeps a previously set host; switches a relay configuration back
    /// to the local transport.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.transport = TransportConfig::Local(self.local_options().with_port(port));
        self
    }

    /// Listens locally on `host`.
    #[must_use]
    pub fn host(mut self, host: IpAddr) -> Self {
        self.transport = TransportConfig::Local(self.local_options().with_host(host));
        self
    }

    /// Uses the relay transport at `relay_url`.
    #[inline]
    #[must_use]
    pub fn relay(mut self, relay_url: impl Into<String>) -> Self {
        self.transport = TransportConfig::Relay(RelayOptions::new(relay_url));
        self
    }

    /// Uses the relay transport with full options.
    #[inline]
    #[must_use]
    pub fn relay_options(mut self, options: RelayOptions) -> Self {
        self.transport = TransportConfig::Relay(options);
        self
    }

    /// Sets the discovery room of a relay configuration.
    ///
    /// Ignored by the local transport.
    #[must_use]
    pub fn discovery_room(mut self, room: impl Into<String>) -> Self {
        if let TransportConfig::Relay(options) = &mut self.transport {
            options.discovery_room = room.into();
        }
        self
    }

    /// Uses a pre-built transport.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.custom = Some(transport);
        self
    }

    /// Sets the execute timeout.
    #[inline]
    #[must_use]
    pub fn execute_timeout(mut self, timeout: Duration) -> Self {
        self.options.execute_timeout = timeout;
        self
    }

    /// Sets the context timeout.
    #[inline]
    #[must_use]
    pub fn context_timeout(mut self, timeout: Duration) -> Self {
        self.options.context_timeout = timeout;
        self
    }

    /// Caps the number of outstanding requests.
    #[inline]
    #[must_use]
    pub fn max_pending(mut self, limit: usize) -> Self {
        self.options.max_pending = Some(limit);
        self
    }

    /// Builds the bridge with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a timeout or the pending cap is zero
    /// - [`Error::Config`] or [`Error::Url`] if the relay options are invalid
    pub fn build(self) -> Result<Bridge> {
        self.options.validate()?;

        let transport = match self.custom {
            Some(transport) => transport,
            None => self.transport.build()?,
        };

        Ok(Bridge::new(transport, self.options))
    }
}

// ============================================================================
// Helpers
// ============================================================================

impl BridgeBuilder {
    /// Current local options, or defaults when a relay is configured.
    fn local_options(&self) -> LocalOptions {
        match &self.transport {
            TransportConfig::Local(options) => *options,
            TransportConfig::Relay(_) => LocalOptions::default(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
