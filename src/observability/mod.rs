//! Observability subsystem.
//!
//! # Design Decisions
//! - Structured logging via `tracing`
//! - Log level configurable via the `RUST_LOG` environment variable

pub mod logging;
