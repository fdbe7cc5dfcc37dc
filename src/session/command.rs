//! Control-channel commands and replies.

use std::fmt;

use crate::vhost::descriptor::is_valid_host_name;

/// Longest command line accepted, terminator included.
pub const MAX_LINE: usize = 512;

/// A parsed client command. Verbs are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Feat,
    /// `HOST` with its argument, if any.
    Host(Option<String>),
    /// `AUTH` with its mechanism, if any.
    Auth(Option<String>),
    Noop,
    Quit,
    Unknown(String),
}

impl Command {
    /// Parse one line, with or without its CRLF terminator.
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb, Some(arg.trim())),
            None => (line, None),
        };
        let arg = arg.filter(|a| !a.is_empty()).map(str::to_string);

        match verb.to_ascii_uppercase().as_str() {
            "FEAT" => Command::Feat,
            "HOST" => Command::Host(arg),
            "AUTH" => Command::Auth(arg),
            "NOOP" => Command::Noop,
            "QUIT" => Command::Quit,
            _ => Command::Unknown(verb.to_ascii_uppercase()),
        }
    }
}

/// Whether a `HOST` argument names a host: a host name or address literal
/// that does not start with `.`.
pub fn is_host_argument(arg: &str) -> bool {
    !arg.starts_with('.') && is_valid_host_name(arg)
}

/// A reply, possibly spanning several lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    /// A multi-line reply. The first and last lines carry the code.
    pub fn multi(code: u16, first: impl Into<String>, body: Vec<String>, last: impl Into<String>) -> Self {
        let mut lines = Vec::with_capacity(body.len() + 2);
        lines.push(first.into());
        lines.extend(body);
        lines.push(last.into());
        Self { code, lines }
    }

    pub fn greeting(banner: &str) -> Self {
        Self::new(220, banner)
    }

    pub fn features(tls: bool) -> Self {
        let mut body = vec![" HOST".to_string()];
        if tls {
            body.push(" AUTH TLS".to_string());
        }
        Self::multi(211, "Features:", body, "End")
    }

    pub fn host_accepted(server_name: &str) -> Self {
        Self::new(220, format!("HOST command successful, now serving {server_name}"))
    }

    pub fn host_unknown(name: &str) -> Self {
        Self::new(504, format!("Unknown virtual host '{name}'"))
    }

    pub fn not_understood(verb: &str) -> Self {
        Self::new(500, format!("'{verb}' not understood"))
    }

    pub fn idle_timeout() -> Self {
        Self::new(421, "Idle timeout, closing control connection")
    }

    pub fn too_many_clients(server_name: &str) -> Self {
        Self::new(421, format!("Too many clients for {server_name}, closing control connection"))
    }

    pub fn shutting_down() -> Self {
        Self::new(421, "Service shutting down, closing control connection")
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            if i == last {
                write!(f, "{} {}\r\n", self.code, line)?;
            } else if i == 0 {
                write!(f, "{}-{}\r\n", self.code, line)?;
            } else {
                write!(f, "{}\r\n", line)?;
            }
        }
        Ok(())
    }
}
