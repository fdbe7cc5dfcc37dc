//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the daemon.
//! All types derive Serde traits for deserialization from config files.
//! Per-host fragments are parsed with the same grammar, but only their
//! `[server]` table is honoured.

use std::path::PathBuf;
use serde::{Deserialize, Serialize};

/// Root configuration for the daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DaemonConfig {
    /// Primary (statically configured) server identity.
    pub server: ServerSection,

    /// Dynamic virtual-host resolution settings.
    pub autohost: AutohostConfig,

    /// Listener configuration (connection limits).
    pub listener: ListenerConfig,

    /// Optional TLS configuration. Enables `AUTH TLS` when present.
    pub tls: Option<TlsConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// A server identity: the `[server]` table of the main configuration or of a
/// per-host fragment.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSection {
    /// Server name. Defaults to the textual address when unset.
    pub name: Option<String>,

    /// Address the primary server listens on (e.g., "0.0.0.0").
    /// Ignored inside fragments.
    pub address: String,

    /// Primary port. Ignored inside fragments.
    pub port: u16,

    /// Additional names this identity answers to.
    pub aliases: Vec<String>,

    /// Greeting banner sent on connect.
    pub ident: Option<String>,

    /// Maximum concurrent clients for this identity.
    pub max_clients: Option<u32>,

    /// Idle timeout for the control connection in seconds.
    pub timeout_idle_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: None,
            address: "0.0.0.0".to_string(),
            port: 21,
            aliases: Vec::new(),
            ident: None,
            max_clients: None,
            timeout_idle_secs: 300,
        }
    }
}

/// Dynamic virtual-host resolution configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AutohostConfig {
    /// Master switch. Default off.
    pub engine: bool,

    /// Path template with `%0`, `%1`..`%4`, `%n` and `%p` placeholders.
    /// Required when the engine is enabled.
    pub config: Option<String>,

    /// Diagnostic log file for this subsystem.
    pub log: Option<PathBuf>,

    /// Extra ports to pre-bind to the primary address at startup.
    pub ports: Vec<u16>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Maximum concurrent connections per listening socket (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1_000,
        }
    }
}

/// TLS configuration for `AUTH TLS`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
