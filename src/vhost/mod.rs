//! Dynamic virtual-host resolution.
//!
//! # Data Flow
//! ```text
//! trigger (connect / SNI / HOST)
//!     → engine.rs (enabled? which name? suppress misses?)
//!     → template.rs (placeholder substitution → path)
//!     → loader.rs (stat, parse via descriptor.rs, fixup, force port)
//!     → alias.rs (name bindings on an existing binding)
//!     → binding.rs (replace or create + open)
//!
//! Startup:
//!     ports.rs pre-binds extra ports to the primary descriptor
//! ```
//!
//! # Design Decisions
//! - Resolution is synchronous; callers on an async runtime run it on the
//!   blocking pool
//! - Failures are contained: they are logged and the connection keeps its
//!   current identity

pub mod alias;
pub mod binding;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod loader;
pub mod ports;
pub mod template;

pub use binding::{Binding, BindingSnapshot, BindingTable};
pub use descriptor::{FragmentParser, ServerDescriptor, TomlFragmentParser};
pub use engine::{Declined, EngineState, Outcome, ResolutionEngine, Trigger};
pub use loader::DescriptorLoader;
pub use template::ConfigTemplate;
