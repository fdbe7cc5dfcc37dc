//! Lookup path derivation.
//!
//! A [`ConfigTemplate`] is a path containing placeholder tokens:
//!
//! | token | replaced with |
//! |-------|---------------|
//! | `%0`  | full textual local address (IPv4 or IPv6) |
//! | `%1`..`%4` | IPv4 octets of the local address |
//! | `%n`  | negotiated server name, verbatim |
//! | `%p`  | local port in decimal |
//!
//! Substitution runs in a fixed order: octets, full address, server name,
//! port. Tokens that are not present, or that have no value (an IPv6 address
//! has no octets, T1 has no name), pass through literally.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

pub const FULL_ADDRESS_TOKEN: &str = "%0";
pub const OCTET_TOKENS: [&str; 4] = ["%1", "%2", "%3", "%4"];
pub const SERVER_NAME_TOKEN: &str = "%n";
pub const PORT_TOKEN: &str = "%p";

/// The process-wide path template. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigTemplate(String);

impl ConfigTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether resolution depends on a negotiated name. Such templates
    /// cannot resolve at connect time.
    pub fn has_server_name_token(&self) -> bool {
        self.0.contains(SERVER_NAME_TOKEN)
    }

    /// Produce the lookup path for one connection.
    pub fn resolve(&self, addr: IpAddr, port: u16, server_name: Option<&str>) -> PathBuf {
        PathBuf::from(substitute(&self.0, addr, port, server_name))
    }
}

impl fmt::Display for ConfigTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Substitute every recognized token in `template`.
///
/// The server name is inserted as given; it is not case-folded even though
/// name bindings compare case-insensitively.
pub fn substitute(template: &str, addr: IpAddr, port: u16, server_name: Option<&str>) -> String {
    let addr = addr.to_canonical();
    let mut path = template.to_string();

    if let IpAddr::V4(v4) = addr {
        for (token, octet) in OCTET_TOKENS.iter().zip(v4.octets()) {
            replace_token(&mut path, token, &octet.to_string());
        }
    }

    replace_token(&mut path, FULL_ADDRESS_TOKEN, &addr.to_string());

    if let Some(name) = server_name {
        replace_token(&mut path, SERVER_NAME_TOKEN, name);
    }

    replace_token(&mut path, PORT_TOKEN, &port.to_string());

    path
}

fn replace_token(path: &mut String, token: &str, value: &str) {
    if path.contains(token) {
        *path = path.replace(token, value);
    }
}
