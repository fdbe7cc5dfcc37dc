//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the primary server descriptor from `[server]`
//! - Build the engine state: primary binding, its aliases, extra ports
//! - Bind listeners and hand them to the control server
//! - Rebuild the engine state on reload without re-binding sockets
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Extra ports are only pre-bound while the engine is enabled
//! - A reload keeps the running primary address and listening sockets;
//!   ports that were not listening before need a restart

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use thiserror::Error;

use crate::config::DaemonConfig;
use crate::net::listener::{Listener, ListenerError};
use crate::vhost::descriptor::fixup;
use crate::vhost::error::StartupError;
use crate::vhost::ports::{ListeningPorts, PortOpener, StaticPortInitializer, TcpPortOpener};
use crate::vhost::{EngineState, ServerDescriptor};

#[derive(Debug, Error)]
pub enum BootError {
    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Everything the daemon needs before it starts accepting.
#[derive(Debug)]
pub struct Bootstrap {
    pub state: EngineState,
    /// Primary listener first, then one per extra port.
    pub listeners: Vec<Listener>,
    /// Address and port the primary listener is bound to.
    pub primary_addr: SocketAddr,
}

/// Parse the configured primary address.
pub fn primary_address(config: &DaemonConfig) -> Result<IpAddr, StartupError> {
    config
        .server
        .address
        .parse::<IpAddr>()
        .map(|ip| ip.to_canonical())
        .map_err(|_| StartupError::InvalidDirective {
            directive: "server.address",
            value: config.server.address.clone(),
        })
}

/// Build the primary descriptor anchored at `addr`.
pub fn primary_descriptor(config: &DaemonConfig, addr: SocketAddr) -> Result<ServerDescriptor, StartupError> {
    Ok(fixup(config.server.clone(), addr.ip(), addr.port(), None)?)
}

/// Build engine state for a primary server bound at `primary_addr`, opening
/// extra ports through `opener`.
pub fn build_state<O: PortOpener>(
    config: &DaemonConfig,
    primary_addr: SocketAddr,
    opener: &O,
) -> Result<(EngineState, Vec<(u16, O::Listener)>), StartupError> {
    let primary = Arc::new(primary_descriptor(config, primary_addr)?);
    let state = EngineState::from_config(&config.autohost, Arc::clone(&primary))?;

    let (addr, port) = (primary_addr.ip(), primary_addr.port());
    let table = state.table();
    table
        .create_binding(Arc::clone(&primary), addr, port)
        .and_then(|_| table.open_binding(addr, port))
        .map_err(StartupError::PrimaryBinding)?;

    for alias in &primary.aliases {
        if let Err(e) = table.create_name_binding(alias, addr, port, Arc::clone(&primary)) {
            tracing::warn!(alias = %alias, error = %e, "Failed to register primary alias");
        }
    }

    let extra = if state.enabled() {
        StaticPortInitializer::new(&state).initialize(addr, port, &config.autohost.ports, opener)
    } else {
        if !config.autohost.ports.is_empty() {
            tracing::debug!("Engine disabled, ignoring extra ports");
        }
        Vec::new()
    };

    tracing::info!(
        primary = %primary.name,
        address = %primary_addr,
        engine_enabled = state.enabled(),
        template = ?state.template().map(|t| t.as_str()),
        bindings = table.len(),
        "Engine state built"
    );

    Ok((state, extra))
}

/// Bind the primary listener and every extra port, then build engine state.
pub async fn bootstrap(config: &DaemonConfig) -> Result<Bootstrap, BootError> {
    let max_connections = config.listener.max_connections;
    let addr = primary_address(config)?;

    let primary = Listener::bind(SocketAddr::new(addr, config.server.port), max_connections).await?;
    let primary_addr = primary.local_addr().map_err(ListenerError::Bind)?;

    let (state, extra) = build_state(config, primary_addr, &TcpPortOpener)?;

    let mut listeners = Vec::with_capacity(extra.len() + 1);
    listeners.push(primary);
    for (port, socket) in extra {
        match Listener::from_std(socket, max_connections) {
            Ok(listener) => listeners.push(listener),
            Err(e) => tracing::warn!(port, error = %e, "Failed to register extra port listener"),
        }
    }

    Ok(Bootstrap {
        state,
        listeners,
        primary_addr,
    })
}

/// Build fresh engine state from a reloaded configuration.
///
/// `listening` lists the ports that already have a socket.
pub fn rebuild_state(
    config: &DaemonConfig,
    primary_addr: SocketAddr,
    listening: &[u16],
) -> Result<EngineState, StartupError> {
    if config.server.port != primary_addr.port() || primary_address(config)? != primary_addr.ip() {
        tracing::warn!(
            running = %primary_addr,
            "Primary address changes take effect after a restart"
        );
    }
    let opener = ListeningPorts::new(listening.iter().copied());
    let (state, _) = build_state(config, primary_addr, &opener)?;
    Ok(state)
}
