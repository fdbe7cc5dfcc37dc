//! Per-host fragment loading.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::net::connection::Connection;
use crate::vhost::descriptor::{fixup, FragmentParser, ServerDescriptor, TomlFragmentParser};
use crate::vhost::error::LoadError;

/// Turns a resolved path into a server descriptor for one connection.
#[derive(Debug, Clone)]
pub struct DescriptorLoader {
    parser: Arc<dyn FragmentParser>,
}

impl Default for DescriptorLoader {
    fn default() -> Self {
        Self::new(Arc::new(TomlFragmentParser))
    }
}

impl DescriptorLoader {
    pub fn new(parser: Arc<dyn FragmentParser>) -> Self {
        Self { parser }
    }

    /// Check that a fragment exists at `path`.
    pub fn stat(&self, path: &Path) -> Result<(), LoadError> {
        fs::metadata(path).map(|_| ()).map_err(|source| LoadError::NotFound {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Stat, parse and fix up the fragment at `path`.
    ///
    /// The descriptor is anchored to the connection's local address and
    /// port whatever the file declares.
    pub fn load(&self, path: &Path, conn: &Connection) -> Result<ServerDescriptor, LoadError> {
        self.stat(path)?;

        let section = self.parser.parse(path).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        fixup(section, conn.local_ip(), conn.local_port(), Some(path.to_path_buf())).map_err(|source| {
            LoadError::Fixup {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}
