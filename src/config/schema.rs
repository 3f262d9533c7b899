//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every field has a default so a minimal config file is valid.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GateConfig {
    /// Listen addresses and TLS material.
    pub listener: ListenerConfig,

    /// Connection admission limits.
    pub limits: LimitsConfig,
}

/// Listener configuration. An absent (or empty) address disables that
/// transport; a server may run with any subset of the four.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ListenerConfig {
    /// Plain TCP listen address (e.g. "0.0.0.0:7000").
    pub tcp_addr: Option<String>,

    /// TLS listen address.
    pub tls_addr: Option<String>,

    /// WebSocket listen address.
    pub ws_addr: Option<String>,

    /// WebSocket-over-TLS listen address.
    pub wss_addr: Option<String>,

    /// TLS material, required when `tls_addr` or `wss_addr` is set.
    pub tls: Option<TlsConfig>,
}

/// TLS certificate material for the secured transports.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Connection admission limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum live connections across all transports.
    pub max_connections: usize,

    /// Default cap on live connections from a single IP.
    pub max_connections_per_ip: usize,

    /// Per-IP override caps for trusted sources; an entry here admits that
    /// IP up to its own cap even when it exceeds `max_connections_per_ip`.
    pub ip_allowlist: HashMap<String, usize>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_connections_per_ip: 64,
            ip_allowlist: HashMap::new(),
        }
    }
}
