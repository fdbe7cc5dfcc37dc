//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the process-wide tracing subscriber
//! - Own the resolution subsystem's diagnostic log file
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging; `RUST_LOG` overrides the
//!   configured level
//! - The diagnostic file is optional: if it cannot be opened the subsystem
//!   runs without it
//! - Refuse to open a log file that is a symlink or whose directory is
//!   world-writable; the symlink check is part of the open on unix

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ObservabilityConfig;

/// Install the global tracing subscriber.
pub fn init(config: &ObservabilityConfig) {
    let default_filter = format!("autohost={level},autohostd={level},tower_http=info", level = config.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Reasons the diagnostic log could not be opened.
#[derive(Debug, Error)]
pub enum LogOpenError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("is a symlink")]
    Symlink,

    #[error("parent directory is world-writable")]
    WorldWritableDir,
}

/// Append-only diagnostic file for the resolution subsystem.
#[derive(Debug, Default)]
pub struct LogSink {
    file: Option<Mutex<File>>,
    path: Option<PathBuf>,
}

impl LogSink {
    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Open (creating if needed) the log file at `path` for appending.
    ///
    /// On unix a symlink at `path` is refused by the open itself.
    pub fn open(path: &Path) -> Result<Self, LogOpenError> {
        #[cfg(not(unix))]
        if std::fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink()) {
            return Err(LogOpenError::Symlink);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let mode = std::fs::metadata(parent)?.permissions().mode();
            if mode & 0o002 != 0 {
                return Err(LogOpenError::WorldWritableDir);
            }
        }

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o660).custom_flags(libc::O_NOFOLLOW);
        }
        let file = options.open(path).map_err(|e| match e.raw_os_error() {
            #[cfg(unix)]
            Some(libc::ELOOP) => LogOpenError::Symlink,
            _ => LogOpenError::Io(e),
        })?;

        Ok(Self {
            file: Some(Mutex::new(file)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open the configured log, degrading to a disabled sink on failure.
    pub fn open_or_disabled(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::disabled();
        };
        match Self::open(path) {
            Ok(sink) => sink,
            Err(e) => {
                tracing::warn!(target: "autohost", path = %path.display(), error = %e, "Unable to open autohost log");
                Self::disabled()
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one line. Write failures are ignored.
    pub fn write(&self, message: fmt::Arguments<'_>) {
        let Some(file) = &self.file else {
            return;
        };
        let Ok(mut file) = file.lock() else {
            return;
        };
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let _ = writeln!(
            file,
            "{}.{:03} [{}] autohost: {}",
            now.as_secs(),
            now.subsec_millis(),
            std::process::id(),
            message
        );
    }
}
