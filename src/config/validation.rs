//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that configured addresses parse as `ip:port`
//! - Require TLS material whenever a TLS-flavored address is set
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GateConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GateConfig;

/// A single semantic problem found in the configuration.
#[derive(Debug)]
pub enum ValidationError {
    /// A listen address does not parse as `ip:port`.
    BadAddress { transport: &'static str, addr: String },
    /// A TLS-flavored address is set but the `[listener.tls]` section is missing.
    MissingTlsMaterial { transport: &'static str },
    /// The `[listener.tls]` section is present but a path is empty.
    EmptyTlsPath { field: &'static str },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::BadAddress { transport, addr } => {
                write!(f, "{} address {:?} is not a valid ip:port", transport, addr)
            }
            ValidationError::MissingTlsMaterial { transport } => {
                write!(f, "{} listener requires [listener.tls] cert_path and key_path", transport)
            }
            ValidationError::EmptyTlsPath { field } => {
                write!(f, "[listener.tls] {} must not be empty", field)
            }
        }
    }
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &GateConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let listener = &config.listener;

    let addresses = [
        ("tcp", &listener.tcp_addr),
        ("tls", &listener.tls_addr),
        ("ws", &listener.ws_addr),
        ("wss", &listener.wss_addr),
    ];
    for (transport, addr) in addresses {
        if let Some(addr) = addr {
            if !addr.is_empty() && addr.parse::<SocketAddr>().is_err() {
                errors.push(ValidationError::BadAddress {
                    transport,
                    addr: addr.clone(),
                });
            }
        }
    }

    for (transport, addr) in [("tls", &listener.tls_addr), ("wss", &listener.wss_addr)] {
        let configured = addr.as_ref().is_some_and(|a| !a.is_empty());
        if configured && listener.tls.is_none() {
            errors.push(ValidationError::MissingTlsMaterial { transport });
        }
    }

    if let Some(tls) = &listener.tls {
        if tls.cert_path.is_empty() {
            errors.push(ValidationError::EmptyTlsPath { field: "cert_path" });
        }
        if tls.key_path.is_empty() {
            errors.push(ValidationError::EmptyTlsPath { field: "key_path" });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
