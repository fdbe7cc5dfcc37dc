//! Error types for dynamic virtual-host resolution.
//!
//! Everything except [`StartupError`] is per-attempt: it is logged, the
//! attempt is abandoned and the connection keeps whatever identity was
//! already bound.

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the fragment parser.
#[derive(Debug, Error)]
pub enum FragmentError {
    #[error("unable to read fragment: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Syntax(#[from] toml::de::Error),
}

/// A parsed `[server]` table that cannot become a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FixupError {
    #[error("server name must not be empty")]
    EmptyName,

    #[error("invalid alias '{0}'")]
    InvalidAlias(String),

    #[error("timeout_idle_secs must be greater than zero")]
    ZeroIdleTimeout,

    #[error("max_clients must be greater than zero")]
    ZeroMaxClients,
}

/// Errors from loading one per-host fragment.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No fragment at the resolved path. Not a fault.
    #[error("error checking for '{}': {source}", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error parsing '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: FragmentError,
    },

    #[error("error fixing up '{}': {source}", path.display())]
    Fixup {
        path: PathBuf,
        #[source]
        source: FixupError,
    },
}

impl LoadError {
    /// True when the stat failed because the file does not exist, as opposed
    /// to e.g. a permission problem on a parent directory.
    pub fn is_file_not_found(&self) -> bool {
        matches!(self, LoadError::NotFound { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Errors from binding-table mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("binding for {0} already exists")]
    Duplicate(SocketAddr),

    #[error("no binding for {0}")]
    NotFound(SocketAddr),

    #[error("name '{name}' already bound on {addr} to '{claimed_by}'")]
    AliasTaken {
        name: String,
        addr: SocketAddr,
        claimed_by: String,
    },
}

/// A failed resolution attempt.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("error creating binding: {0}")]
    BindingCreate(#[source] BindingError),

    #[error("error opening binding: {0}")]
    BindingOpen(#[source] BindingError),
}

/// Fatal configuration problems detected while building engine state.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("missing required {0} directive")]
    ConfigMissing(&'static str),

    #[error("invalid {directive} '{value}'")]
    InvalidDirective { directive: &'static str, value: String },

    #[error("invalid primary server configuration: {0}")]
    PrimaryServer(#[from] FixupError),

    #[error("unable to bind primary server: {0}")]
    PrimaryBinding(#[source] BindingError),
}
