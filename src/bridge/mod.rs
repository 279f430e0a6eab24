//! Bridge facade.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Bridge`] | Request/response facade over one transport |
//! | [`BridgeBuilder`] | Fluent configuration builder |
//! | [`BridgeOptions`] | Request timeouts and pending cap |
//! | [`BridgeConfig`] | Full configuration, loadable from the environment |
//!
//! # Example
//!
//! ```no_run
//! use agent_bridge::{Bridge, Result};
//!
//! # async fn example() -> Result<()> {
//! let bridge = Bridge::builder().port(9223).build()?;
//! bridge.start().await?;
//!
//! if bridge.is_connected() {
//!     let context = bridge.query_context().await?;
//!     println!("{context}");
//! }
//!
//! bridge.stop().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for bridge configuration.
pub mod builder;

/// Bridge facade and correlation core.
pub mod core;

/// Options and environment configuration.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::BridgeBuilder;
pub use self::core::{Bridge, ExecutionOutcome};
pub use options::{BridgeConfig, BridgeOptions, TransportConfig};
