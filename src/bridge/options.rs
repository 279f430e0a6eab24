//! Bridge configuration.
//!
//! Options are normally built in code ([`BridgeOptions`], [`LocalOptions`],
//! [`RelayOptions`]) or loaded from the environment with
//! [`BridgeConfig::from_env`].
//!
//! # Environment
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `AGENT_BRIDGE_PORT` | Local listening port | `9223` |
//! | `AGENT_BRIDGE_HOST` | Local bind address | `127.0.0.1` |
//! | `AGENT_BRIDGE_RELAY_URL` | Use the relay transport at this URL | unset |
//! | `AGENT_BRIDGE_DISCOVERY_ROOM` | Discovery room ID | `discovery` |
//! | `AGENT_BRIDGE_EXECUTE_TIMEOUT_MS` | Execute timeout | `300000` |
//! | `AGENT_BRIDGE_CONTEXT_TIMEOUT_MS` | Context timeout | `10000` |
//! | `AGENT_BRIDGE_PEER_TTL_MS` | Stale-peer TTL | `30000` |
//! | `AGENT_BRIDGE_SWEEP_INTERVAL_MS` | Stale sweep interval | `15000` |
//! | `AGENT_BRIDGE_RECONNECT_BACKOFF_MS` | Discovery reconnect backoff | `5000` |
//! | `AGENT_BRIDGE_MAX_PENDING` | Cap on outstanding requests | unbounded |

// ============================================================================
// Imports
// ============================================================================

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::transport::local::{LocalOptions, LocalTransport};
use crate::transport::relay::{RelayOptions, RelayTransport};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for `execute_remote`.
pub const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default timeout for `query_context`.
pub const DEFAULT_CONTEXT_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable prefix.
const ENV_PREFIX: &str = "AGENT_BRIDGE_";

// ============================================================================
// BridgeOptions
// ============================================================================

/// Request-level options of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Time allowed for an `EXECUTION_RESULT`.
    pub execute_timeout: Duration,
    /// Time allowed for a `CONTEXT_RESPONSE`.
    pub context_timeout: Duration,
    /// Optional cap on outstanding requests.
    pub max_pending: Option<usize>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeOptions {
    /// Creates options with default timeouts and no pending cap.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            execute_timeout: DEFAULT_EXECUTE_TIMEOUT,
            context_timeout: DEFAULT_CONTEXT_TIMEOUT,
            max_pending: None,
        }
    }

    /// Sets the execute timeout.
    #[inline]
    #[must_use]
    pub fn with_execute_timeout(mut self, timeout: Duration) -> Self {
        self.execute_timeout = timeout;
        self
    }

    /// Sets the context timeout.
    #[inline]
    #[must_use]
    pub fn with_context_timeout(mut self, timeout: Duration) -> Self {
        self.context_timeout = timeout;
        self
    }

    /// Caps the number of outstanding requests.
    #[inline]
    #[must_use]
    pub fn with_max_pending(mut self, limit: usize) -> Self {
        self.max_pending = Some(limit);
        self
    }

    /// Checks the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero timeout or a zero cap.
    pub fn validate(&self) -> Result<()> {
        if self.execute_timeout.is_zero() || self.context_timeout.is_zero() {
            return Err(Error::config("request timeouts must be non-zero"));
        }
        if self.max_pending == Some(0) {
            return Err(Error::config("max pending must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// TransportConfig
// ============================================================================

/// Which transport a bridge uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// Listening socket.
    Local(LocalOptions),
    /// Relay with discovery.
    Relay(RelayOptions),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Local(LocalOptions::default())
    }
}

impl TransportConfig {
    /// Builds the configured transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] or [`Error::Url`] for invalid relay
    /// options.
    pub fn build(self) -> Result<Arc<dyn Transport>> {
        Ok(match self {
            Self::Local(options) => Arc::new(LocalTransport::new(options)),
            Self::Relay(options) => Arc::new(RelayTransport::new(options)?),
        })
    }
}

// ============================================================================
// BridgeConfig
// ============================================================================

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Request-level options.
    pub bridge: BridgeOptions,
    /// Transport selection.
    pub transport: TransportConfig,
}

impl BridgeConfig {
    /// Loads configuration from `AGENT_BRIDGE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through a variable lookup.
    ///
    /// `lookup` receives full variable names such as `AGENT_BRIDGE_PORT`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let mut bridge = BridgeOptions::new();
        if let Some(timeout) = env.millis("EXECUTE_TIMEOUT_MS")? {
            bridge.execute_timeout = timeout;
        }
        if let Some(timeout) = env.millis("CONTEXT_TIMEOUT_MS")? {
            bridge.context_timeout = timeout;
        }
        bridge.max_pending = env.parse("MAX_PENDING")?;
        bridge.validate()?;

        let transport = match env.get("RELAY_URL") {
            Some(relay_url) => {
                let mut relay = RelayOptions::new(relay_url);
                if let Some(room) = env.get("DISCOVERY_ROOM") {
                    relay.discovery_room = room;
                }
                if let Some(ttl) = env.millis("PEER_TTL_MS")? {
                    relay.peer_ttl = ttl;
                }
                if let Some(interval) = env.millis("SWEEP_INTERVAL_MS")? {
                    relay.sweep_interval = interval;
                }
                if let Some(backoff) = env.millis("RECONNECT_BACKOFF_MS")? {
                    relay.reconnect_backoff = backoff;
                }
                relay.validate()?;
                TransportConfig::Relay(relay)
            }
            None => {
                let mut local = LocalOptions::default();
                if let Some(port) = env.parse::<u16>("PORT")? {
                    local.port = port;
                }
                if let Some(host) = env.parse::<IpAddr>("HOST")? {
                    local.host = host;
                }
                TransportConfig::Local(local)
            }
        };

        Ok(Self { bridge, transport })
    }
}

// ============================================================================
// EnvReader
// ============================================================================

/// Typed access to prefixed variables.
struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Returns a trimmed, non-empty value.
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{name}"))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        self.get(name)
            .map(|raw| {
                raw.parse().map_err(|_| {
                    Error::config(format!("invalid value for {ENV_PREFIX}{name}: {raw:?}"))
                })
            })
            .transpose()
    }

    fn millis(&self, name: &str) -> Result<Option<Duration>> {
        match self.parse::<u64>(name)? {
            Some(0) => Err(Error::config(format!("{ENV_PREFIX}{name} must be non-zero"))),
            Some(ms) => Ok(Some(Duration::from_millis(ms))),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
