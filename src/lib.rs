//! Per-connection virtual-host resolution for a control-channel daemon.

pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod session;
pub mod vhost;

pub use config::schema::DaemonConfig;
pub use lifecycle::Shutdown;
pub use session::ControlServer;
pub use vhost::ResolutionEngine;
