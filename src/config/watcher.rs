//! Hot reload of the daemon configuration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::DaemonConfig;

/// Forwards every configuration that loads and validates after a change on
/// disk. A broken edit is logged and the running configuration stays.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<DaemonConfig>,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<DaemonConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            updates,
        };
        (watcher, rx)
    }

    /// Start watching. Updates stop when the returned handle is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, updates } = self;
        let watched = path.clone();

        let handler = move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!(error = %e, "Config watch error");
                    return;
                }
            };
            if !(event.kind.is_modify() || event.kind.is_create()) {
                return;
            }

            tracing::info!(path = %watched.display(), "Config file changed");
            match load_config(&watched) {
                Ok(config) => {
                    if updates.send(config).is_err() {
                        tracing::debug!("Config update receiver gone");
                    }
                }
                Err(e) => tracing::error!(error = %e, "Config reload rejected, keeping current configuration"),
            }
        };

        let mut watcher = RecommendedWatcher::new(handler, Config::default().with_poll_interval(Duration::from_secs(2)))?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Watching config file");
        Ok(watcher)
    }
}
