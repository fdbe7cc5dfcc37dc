//! Control-port listeners with a per-socket session cap.
//!
//! # Responsibilities
//! - Bind the primary control port, or adopt a socket bound at startup for
//!   an extra port
//! - Hold back `accept` while the socket's session cap is reached

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("unable to bind listening socket: {0}")]
    Bind(#[source] io::Error),

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("listener closed")]
    Closed,
}

/// A listening socket that admits at most `max_connections` sessions at once.
#[derive(Debug)]
pub struct Listener {
    socket: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(addr: SocketAddr, max_connections: usize) -> Result<Self, ListenerError> {
        let socket = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        Self::with_socket(socket, max_connections)
    }

    /// Adopt a non-blocking socket bound elsewhere. Must be called inside a
    /// Tokio runtime.
    pub fn from_std(socket: std::net::TcpListener, max_connections: usize) -> Result<Self, ListenerError> {
        let socket = TcpListener::from_std(socket).map_err(ListenerError::Bind)?;
        Self::with_socket(socket, max_connections)
    }

    fn with_socket(socket: TcpListener, max_connections: usize) -> Result<Self, ListenerError> {
        let addr = socket.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(address = %addr, max_connections, "Control port listening");

        Ok(Self {
            socket,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// Wait for a free session slot, then accept.
    ///
    /// The returned [`SessionSlot`] must live as long as the session.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, SessionSlot), ListenerError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, peer_addr) = self.socket.accept().await.map_err(ListenerError::Accept)?;
        tracing::debug!(
            peer_addr = %peer_addr,
            free_slots = self.slots.available_permits(),
            "Control connection accepted"
        );

        Ok((stream, peer_addr, SessionSlot { _permit: permit }))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// One occupied session slot; released on drop, including on panic.
#[derive(Debug)]
pub struct SessionSlot {
    _permit: OwnedSemaphorePermit,
}
