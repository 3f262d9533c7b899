//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, one per configured transport)
//!     → admission.rs (global and per-IP caps, registration)
//!     → tls.rs (TLS handshake for the secured transports)
//!     → WebSocket upgrade (ws/wss transports)
//!     → agent.rs (hand off to the embedding server's on_connect hook)
//! ```
//!
//! # Design Decisions
//! - One parameterized accept loop serves all four transport flavors
//! - Admission is atomic: check and register under a single lock
//! - Each registered connection carries a cancellation token so it can be
//!   force-closed during shutdown

use std::fmt;

pub mod admission;
pub mod agent;
pub mod listener;
pub mod tls;

/// Bookkeeping kind of the underlying byte stream. WebSocket connections
/// count under the stream they run over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Plain,
    Tls,
}

/// The four listener flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl Transport {
    /// The registry a connection of this transport is tracked under.
    pub fn stream_kind(self) -> StreamKind {
        match self {
            Transport::Tcp | Transport::Ws => StreamKind::Plain,
            Transport::Tls | Transport::Wss => StreamKind::Tls,
        }
    }

    /// Whether this transport performs a WebSocket upgrade after the
    /// stream is established.
    pub fn upgrades(self) -> bool {
        matches!(self, Transport::Ws | Transport::Wss)
    }

    /// Whether this transport wraps the stream in TLS.
    pub fn secured(self) -> bool {
        matches!(self, Transport::Tls | Transport::Wss)
    }

    pub fn scheme(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Tls => "tls",
            Transport::Ws => "ws",
            Transport::Wss => "wss",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}
