//! Sockets and connection plumbing.
//!
//! # Data Flow
//! ```text
//! listening socket
//!     → listener.rs (session cap, accept)
//!     → connection.rs (id, local/peer address, live-session count)
//!     → session::ControlServer
//!     → tls.rs (acceptor used on AUTH TLS; client SNI read after handshake)
//! ```
//!
//! # Design Decisions
//! - Each socket caps its own sessions; excess clients wait in the backlog
//! - TLS is negotiated in-band, never on a dedicated port

pub mod connection;
pub mod listener;
pub mod tls;
