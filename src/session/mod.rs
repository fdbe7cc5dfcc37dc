//! Control-channel sessions.
//!
//! # Data Flow
//! ```text
//! accept (net::listener)
//!     → connect trigger → route → max_clients (limits.rs) → 220 greeting
//!     → command loop (command.rs)
//!         HOST     → host name check → host command trigger → route → 220 | 504
//!         AUTH TLS → 234 → handshake → name-negotiated trigger (SNI) → route
//! ```

pub mod command;
pub mod limits;
pub mod server;

pub use server::ControlServer;
