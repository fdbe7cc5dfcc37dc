//! Connection identity and session accounting.
//!
//! # Responsibilities
//! - Number control connections for log correlation
//! - Record the local and peer addresses a connection was accepted on
//! - Count live sessions so shutdown can wait for them

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection number, shown as `conn-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The attributes of an accepted connection that resolution reads.
///
/// Immutable for the lifetime of the connection. The negotiated server name
/// is not stored here: each trigger supplies its own.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Describe a connection accepted on `local_addr` from `peer_addr`.
    ///
    /// IPv4-mapped IPv6 local addresses are stored as plain IPv4.
    pub fn new(local_addr: SocketAddr, peer_addr: SocketAddr) -> Self {
        Self {
            id: ConnectionId::next(),
            local_addr: SocketAddr::new(local_addr.ip().to_canonical(), local_addr.port()),
            peer_addr,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Local address and port the client connected to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn local_ip(&self) -> IpAddr {
        self.local_addr.ip()
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

/// Counts live sessions. Clones share the count.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    live: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `id` as live until the returned guard is dropped.
    pub fn track(&self, id: ConnectionId) -> ConnectionGuard {
        self.live.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            live: Arc::clone(&self.live),
            id,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.live.load(Ordering::SeqCst)
    }

    /// Wait until every session has ended or `deadline` passes.
    ///
    /// Returns `true` if the count reached zero in time.
    pub async fn wait_for_drain(&self, deadline: Duration) -> bool {
        let drained = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        tokio::time::timeout(deadline, drained).await.is_ok()
    }
}

/// Keeps one session counted while alive.
#[derive(Debug)]
pub struct ConnectionGuard {
    live: Arc<AtomicU64>,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Session ended");
    }
}
