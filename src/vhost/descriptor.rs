//! Server descriptors and the fragment parser seam.
//!
//! # Responsibilities
//! - Define the normalized in-memory server identity ([`ServerDescriptor`])
//! - Parse per-host fragments with the main configuration's grammar
//! - Fixup: normalize and validate a parsed `[server]` table
//!
//! # Design Decisions
//! - Only the `[server]` table of a fragment is honoured; everything else is
//!   accepted syntactically and ignored
//! - `address` and `port` inside a fragment are ignored: the identity is
//!   anchored to where the client actually connected
//! - Descriptors are immutable and shared via `Arc`

use std::fmt;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::ServerSection;
use crate::vhost::error::{FixupError, FragmentError};

/// The normalized result of parsing one server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerDescriptor {
    /// Server name, as displayed and matched by `HOST`.
    pub name: String,
    pub addr: IpAddr,
    pub port: u16,
    /// Additional host names, de-duplicated case-insensitively.
    pub aliases: Vec<String>,
    /// Greeting banner.
    pub ident: Option<String>,
    /// Concurrent sessions this identity admits; unlimited when `None`.
    pub max_clients: Option<u32>,
    pub timeout_idle_secs: u64,
    /// Fragment this descriptor was loaded from; `None` for the primary server.
    pub source: Option<PathBuf>,
}

impl ServerDescriptor {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }

    /// Text of the `220` greeting for this identity.
    pub fn banner(&self) -> String {
        match &self.ident {
            Some(ident) => ident.clone(),
            None => format!("{} ready", self.name),
        }
    }

    /// Whether `name` is this server's name or one of its aliases,
    /// ignoring ASCII case.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(name))
    }
}

/// Parses a per-host fragment into a `[server]` section.
pub trait FragmentParser: Send + Sync + fmt::Debug {
    fn parse(&self, path: &Path) -> Result<ServerSection, FragmentError>;
}

/// Parses fragments as TOML, the grammar of the main configuration file.
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlFragmentParser;

impl FragmentParser for TomlFragmentParser {
    fn parse(&self, path: &Path) -> Result<ServerSection, FragmentError> {
        let content = fs::read_to_string(path)?;
        parse_fragment(&content, path)
    }
}

/// Directives inside `[server]` that only make sense in the main file.
const IGNORED_SERVER_KEYS: [&str; 2] = ["address", "port"];

fn parse_fragment(content: &str, path: &Path) -> Result<ServerSection, FragmentError> {
    let mut table: toml::Table = content.parse()?;

    let server = table.remove("server");
    for key in table.keys() {
        tracing::debug!(target: "autohost", path = %path.display(), key = %key, "Ignoring directive in fragment");
    }

    let Some(server) = server else {
        return Ok(ServerSection::default());
    };

    if let toml::Value::Table(section) = &server {
        for key in IGNORED_SERVER_KEYS.iter().filter(|k| section.contains_key(**k)) {
            tracing::debug!(target: "autohost", path = %path.display(), key = %key, "Ignoring server directive in fragment");
        }
    }

    Ok(server.try_into::<ServerSection>()?)
}

/// Normalize a parsed section into a descriptor anchored at `addr`:`port`.
pub fn fixup(
    section: ServerSection,
    addr: IpAddr,
    port: u16,
    source: Option<PathBuf>,
) -> Result<ServerDescriptor, FixupError> {
    let name = match section.name.as_deref().map(str::trim) {
        Some("") => return Err(FixupError::EmptyName),
        Some(name) => name.to_string(),
        None => addr.to_string(),
    };

    let mut aliases: Vec<String> = Vec::with_capacity(section.aliases.len());
    for alias in &section.aliases {
        let alias = alias.trim();
        if !is_valid_host_name(alias) {
            return Err(FixupError::InvalidAlias(alias.to_string()));
        }
        if !aliases.iter().any(|seen| seen.eq_ignore_ascii_case(alias)) {
            aliases.push(alias.to_string());
        }
    }

    if section.timeout_idle_secs == 0 {
        return Err(FixupError::ZeroIdleTimeout);
    }

    if section.max_clients == Some(0) {
        return Err(FixupError::ZeroMaxClients);
    }

    Ok(ServerDescriptor {
        name,
        addr,
        port,
        aliases,
        ident: section.ident,
        max_clients: section.max_clients,
        timeout_idle_secs: section.timeout_idle_secs,
        source,
    })
}

/// Host names and address literals: letters, digits, `-`, `.`, `_` and `:`.
pub(crate) fn is_valid_host_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 253
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | ':'))
}
