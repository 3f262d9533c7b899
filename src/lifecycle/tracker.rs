//! Outstanding-connection tracking for graceful shutdown.
//!
//! # Responsibilities
//! - Count connections from admission until their teardown completes
//! - Generate unique connection IDs for tracing
//! - Let shutdown block until the count drains to zero

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks connections that have been admitted and not yet fully torn down.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    outstanding: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new admitted connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            outstanding: Arc::clone(&self.outstanding),
            id: ConnectionId::new(),
        }
    }

    /// Connections admitted and not yet fully torn down.
    pub fn outstanding(&self) -> u64 {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Block until every tracked connection has finished teardown.
    pub async fn wait_until_drained(&self) {
        while self.outstanding.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements the outstanding count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    outstanding: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "connection torn down");
    }
}
