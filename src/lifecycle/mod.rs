//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Admission (net/admission.rs):
//!     connection admitted → tracker.rs counts it
//!
//! Shutdown (server.rs):
//!     close listeners → force-close registered connections
//!     → tracker.rs blocks until the outstanding count drains to zero
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accepting, force-close, drain
//! - Teardown is RAII-driven so the count can never leak

pub mod signals;
pub mod tracker;

pub use tracker::{ConnectionGuard, ConnectionId, ConnectionTracker};
