//! Daemon configuration.
//!
//! # Data Flow
//! ```text
//! autohost.toml
//!     → loader.rs (TOML → DaemonConfig)
//!     → validation.rs (every semantic problem reported at once)
//!     → lifecycle::startup builds EngineState
//!
//! Reload (file change or SIGHUP):
//!     watcher.rs → loader.rs → fresh EngineState swapped into the engine
//! ```
//!
//! # Design Decisions
//! - Every section has defaults so a minimal file works
//! - Per-host fragments reuse `ServerSection`, so both files share one
//!   grammar

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::DaemonConfig;
pub use schema::{AdminConfig, AutohostConfig, ListenerConfig, ObservabilityConfig, ServerSection, TlsConfig};
