//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Require the path template when the engine is enabled
//! - Validate value ranges (ports, timeouts)
//! - Require absolute paths for templates, log files and TLS material
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DaemonConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::DaemonConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A directive required by another setting is absent.
    #[error("missing required {directive}: {reason}")]
    MissingDirective {
        directive: &'static str,
        reason: &'static str,
    },

    /// A path directive is not an absolute path.
    #[error("{directive}: '{path}' is not a valid path")]
    InvalidPath { directive: &'static str, path: String },

    /// A port is outside 1..=65535.
    #[error("{directive}: port must be between 1 and 65535")]
    InvalidPort { directive: &'static str },

    /// An address that must be an IP literal is not one.
    #[error("{directive}: '{value}' is not an IP address")]
    InvalidAddress { directive: &'static str, value: String },

    /// A numeric value that must be positive is zero.
    #[error("{directive} must be greater than zero")]
    Zero { directive: &'static str },
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &DaemonConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.address.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            directive: "server.address",
            value: config.server.address.clone(),
        });
    }
    if config.server.port == 0 {
        errors.push(ValidationError::InvalidPort { directive: "server.port" });
    }
    if config.server.timeout_idle_secs == 0 {
        errors.push(ValidationError::Zero { directive: "server.timeout_idle_secs" });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero { directive: "listener.max_connections" });
    }

    let autohost = &config.autohost;
    match &autohost.config {
        Some(template) => {
            if !is_valid_path(Path::new(template)) {
                errors.push(ValidationError::InvalidPath {
                    directive: "autohost.config",
                    path: template.clone(),
                });
            }
        }
        None if autohost.engine => {
            errors.push(ValidationError::MissingDirective {
                directive: "autohost.config",
                reason: "required when autohost.engine is on",
            });
        }
        None => {}
    }

    if let Some(log) = &autohost.log {
        if !is_valid_path(log) {
            errors.push(ValidationError::InvalidPath {
                directive: "autohost.log",
                path: log.display().to_string(),
            });
        }
    }

    if autohost.ports.iter().any(|port| *port == 0) {
        errors.push(ValidationError::InvalidPort { directive: "autohost.ports" });
    }

    if let Some(tls) = &config.tls {
        for (directive, path) in [("tls.cert_path", &tls.cert_path), ("tls.key_path", &tls.key_path)] {
            if !is_valid_path(path) {
                errors.push(ValidationError::InvalidPath {
                    directive,
                    path: path.display().to_string(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Paths in the configuration must be absolute.
fn is_valid_path(path: &Path) -> bool {
    path.is_absolute()
}
