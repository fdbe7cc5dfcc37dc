//! Process lifecycle.
//!
//! # Data Flow
//! ```text
//! startup.rs:
//!     config → primary descriptor → listeners → engine state
//!
//! signals.rs:
//!     SIGHUP → reload config → rebuild state → engine reset
//!     SIGTERM/SIGINT → shutdown
//!
//! shutdown.rs:
//!     broadcast → accept loops stop → sessions get 421 → drain with deadline
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
