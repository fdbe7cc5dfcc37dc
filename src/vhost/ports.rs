//! Startup pre-binding of extra ports.
//!
//! # Responsibilities
//! - Open a listening socket for each administrator-declared extra port
//! - Bind each such port to the primary server descriptor
//!
//! # Design Decisions
//! - The primary port and already-bound ports are skipped
//! - A failure on one port is logged and never stops the others
//! - Socket creation sits behind [`PortOpener`] so a reload can rebuild
//!   bindings without re-binding sockets that are still listening

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, SocketAddr};

use crate::vhost::engine::EngineState;

/// Opens the listening socket for one extra port.
pub trait PortOpener {
    type Listener;

    fn open(&self, addr: SocketAddr) -> io::Result<Self::Listener>;
}

/// Binds real, non-blocking TCP listeners.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpPortOpener;

impl PortOpener for TcpPortOpener {
    type Listener = std::net::TcpListener;

    fn open(&self, addr: SocketAddr) -> io::Result<Self::Listener> {
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(listener)
    }
}

/// Reuses sockets that are already listening; used when rebuilding state on
/// reload. Ports that are not listening yet need a restart.
#[derive(Debug, Clone, Default)]
pub struct ListeningPorts {
    ports: HashSet<u16>,
}

impl ListeningPorts {
    pub fn new(ports: impl IntoIterator<Item = u16>) -> Self {
        Self {
            ports: ports.into_iter().collect(),
        }
    }
}

impl PortOpener for ListeningPorts {
    type Listener = ();

    fn open(&self, addr: SocketAddr) -> io::Result<()> {
        if self.ports.contains(&addr.port()) {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "new extra ports take effect after a restart",
            ))
        }
    }
}

/// Pre-binds extra ports to the primary descriptor.
#[derive(Debug, Clone, Copy)]
pub struct StaticPortInitializer<'a> {
    state: &'a EngineState,
}

impl<'a> StaticPortInitializer<'a> {
    pub fn new(state: &'a EngineState) -> Self {
        Self { state }
    }

    /// Bind every port in `ports` on `addr`, returning the sockets opened
    /// with their port numbers.
    pub fn initialize<O: PortOpener>(
        &self,
        addr: IpAddr,
        primary_port: u16,
        ports: &[u16],
        opener: &O,
    ) -> Vec<(u16, O::Listener)> {
        let table = self.state.table();
        let log = self.state.log();
        let mut opened = Vec::new();

        for &port in ports {
            if port == primary_port {
                tracing::debug!(target: "autohost", port, "Extra port is the primary port, skipping");
                continue;
            }
            if table.find_binding(addr, port).is_some() {
                tracing::debug!(target: "autohost", port, "Extra port already bound, skipping");
                continue;
            }

            log.write(format_args!("adding socket for AutoHostPort {port}"));

            let listener = match opener.open(SocketAddr::new(addr, port)) {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::warn!(target: "autohost", port, error = %e, "Error opening listening socket");
                    log.write(format_args!("error opening new listening socket for port {port}: {e}"));
                    continue;
                }
            };

            if let Err(e) = table.create_binding(self.state.primary().clone(), addr, port) {
                tracing::warn!(target: "autohost", port, error = %e, "Error creating binding");
                log.write(format_args!("error creating binding for {addr}#{port}: {e}"));
                continue;
            }

            if let Err(e) = table.open_binding(addr, port) {
                tracing::warn!(target: "autohost", port, error = %e, "Error opening binding");
                log.write(format_args!("error opening binding for {addr}:{port}: {e}"));
                continue;
            }

            tracing::info!(target: "autohost", address = %addr, port, "Listening on extra port");
            log.write(format_args!("opening listening socket for {addr} on AutoHostPort {port}"));
            opened.push((port, listener));
        }

        opened
    }
}
