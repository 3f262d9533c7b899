//! Multi-transport connection admission and lifecycle management.
//!
//! # Architecture Overview
//!
//! ```text
//!   tcp ──┐
//!   tls ──┤   ┌──────────┐    ┌────────────┐    ┌─────────────────┐
//!   ws  ──┼──▶│ listener │───▶│ admission  │───▶│ agent hand-off  │──▶ on_connect
//!   wss ──┘   │ (accept) │    │ controller │    │ (tls/ws setup)  │
//!             └──────────┘    └────────────┘    └─────────────────┘
//!                                   │                    │
//!                                   ▼                    ▼
//!                             ┌────────────┐      ┌────────────┐
//!                             │ registries │      │  lifecycle │
//!                             │ + IP caps  │      │  tracker   │
//!                             └────────────┘      └────────────┘
//! ```
//!
//! Four optional listeners feed one admission controller that enforces a
//! global connection cap and per-IP caps with allowlist overrides. Every
//! admitted connection is registered so shutdown can force-close it, and
//! tracked so shutdown can block until its teardown completes.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod server;

pub use config::GateConfig;
pub use net::agent::{Agent, AgentInfo, AgentStream};
pub use net::{StreamKind, Transport};
pub use server::{GateError, GateServer};
