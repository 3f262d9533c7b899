//! Connection admission control.
//!
//! # Responsibilities
//! - Enforce the global connection cap across both stream kinds
//! - Enforce per-IP caps, with allowlist overrides for trusted IPs
//! - Track every admitted connection so shutdown can force-close it
//!
//! # Design Decisions
//! - One mutex covers both registries and the per-IP counters: the global
//!   check reads both registries and the per-IP check reads the counters in
//!   the same decision, so they must move as a unit
//! - Admission returns an RAII permit; dropping it releases the slot, which
//!   makes release exactly-once by construction
//! - Critical sections perform no blocking I/O

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::config::LimitsConfig;

use super::StreamKind;

/// Shared registry of admitted connections and per-source-IP counters.
///
/// Constructed once per server instance and shared by every listener;
/// cloning is cheap and refers to the same registries.
#[derive(Clone)]
pub struct AdmissionController {
    shared: Arc<Shared>,
}

struct Shared {
    limits: LimitsConfig,
    inner: Mutex<Registries>,
}

#[derive(Default)]
struct Registries {
    /// Live plain-stream connections, keyed by remote `ip:port`.
    plain: HashMap<String, CancellationToken>,
    /// Live TLS-stream connections, keyed by remote `ip:port`.
    tls: HashMap<String, CancellationToken>,
    /// Live-connection count per remote IP. Never retains zero entries.
    ip_counts: HashMap<String, usize>,
}

impl Registries {
    fn registry(&mut self, kind: StreamKind) -> &mut HashMap<String, CancellationToken> {
        match kind {
            StreamKind::Plain => &mut self.plain,
            StreamKind::Tls => &mut self.tls,
        }
    }
}

/// Point-in-time registry totals, used by logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionStats {
    /// Registered plain-stream connections.
    pub plain: usize,
    /// Registered TLS-stream connections.
    pub tls: usize,
    /// Distinct IPs with a live counter entry.
    pub ips: usize,
    /// Sum of all per-IP counters.
    pub per_ip_total: usize,
}

impl AdmissionController {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                limits,
                inner: Mutex::new(Registries::default()),
            }),
        }
    }

    /// Atomically check the caps and register the connection.
    ///
    /// Returns `None` when the connection must be rejected; the caller drops
    /// the socket, which closes it. On success the returned permit holds the
    /// registered slot until it is dropped.
    pub fn try_admit(&self, peer: SocketAddr, kind: StreamKind) -> Option<ConnectionPermit> {
        let limits = &self.shared.limits;
        let mut inner = self.shared.inner.lock().expect("admission lock poisoned");

        if inner.plain.len() + inner.tls.len() >= limits.max_connections {
            tracing::warn!(peer = %peer, max = limits.max_connections,
                "connection limit reached, rejecting");
            return None;
        }

        let ip = peer.ip().to_string();
        let current = inner.ip_counts.get(&ip).copied().unwrap_or(0);
        let allow_cap = limits.ip_allowlist.get(&ip).copied().unwrap_or(0);
        // An allowlisted IP is admitted until it reaches its own cap, even
        // past the default; both conditions must hold to reject.
        if current >= limits.max_connections_per_ip && current >= allow_cap {
            tracing::warn!(peer = %peer, current, "per-ip connection limit reached, rejecting");
            return None;
        }

        let token = CancellationToken::new();
        inner.registry(kind).insert(peer.to_string(), token.clone());
        *inner.ip_counts.entry(ip).or_insert(0) += 1;

        Some(ConnectionPermit {
            controller: self.clone(),
            peer,
            kind,
            token,
        })
    }

    /// Remove a connection's record and decrement its IP counter, pruning
    /// the entry at zero. Called exactly once per admitted connection, from
    /// the permit's drop.
    fn release(&self, peer: SocketAddr, kind: StreamKind) {
        let mut inner = self.shared.inner.lock().expect("admission lock poisoned");

        // The record may already be gone if the connection was force-closed;
        // the IP counter is still ours to decrement.
        inner.registry(kind).remove(&peer.to_string());

        let ip = peer.ip().to_string();
        if let Some(count) = inner.ip_counts.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inner.ip_counts.remove(&ip);
            }
        }
    }

    /// Force-close every registered connection by cancelling its token and
    /// dropping its record. Returns how many were signalled. IP counters are
    /// left to the in-flight close callbacks.
    pub fn force_close_all(&self) -> usize {
        let mut inner = self.shared.inner.lock().expect("admission lock poisoned");
        let mut closed = 0;
        for (_, token) in inner.plain.drain() {
            token.cancel();
            closed += 1;
        }
        for (_, token) in inner.tls.drain() {
            token.cancel();
            closed += 1;
        }
        closed
    }

    /// Registered connections across both stream kinds.
    pub fn registered(&self) -> usize {
        let inner = self.shared.inner.lock().expect("admission lock poisoned");
        inner.plain.len() + inner.tls.len()
    }

    pub fn stats(&self) -> AdmissionStats {
        let inner = self.shared.inner.lock().expect("admission lock poisoned");
        AdmissionStats {
            plain: inner.plain.len(),
            tls: inner.tls.len(),
            ips: inner.ip_counts.len(),
            per_ip_total: inner.ip_counts.values().sum(),
        }
    }
}

/// An admitted connection's slot in the registry.
///
/// Dropping the permit releases the slot: the record is removed, the IP
/// counter decremented, and the counter entry pruned at zero.
pub struct ConnectionPermit {
    controller: AdmissionController,
    peer: SocketAddr,
    kind: StreamKind,
    token: CancellationToken,
}

impl ConnectionPermit {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Token cancelled when the connection is force-closed. The connection's
    /// I/O loop must race against it and drop the stream when it fires.
    pub fn close_signal(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.controller.release(self.peer, self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn controller(max: usize, per_ip: usize) -> Arc<AdmissionController> {
        Arc::new(AdmissionController::new(LimitsConfig {
            max_connections: max,
            max_connections_per_ip: per_ip,
            ip_allowlist: HashMap::new(),
        }))
    }

    fn controller_with_allowlist(
        max: usize,
        per_ip: usize,
        allowlist: &[(&str, usize)],
    ) -> Arc<AdmissionController> {
        Arc::new(AdmissionController::new(LimitsConfig {
            max_connections: max,
            max_connections_per_ip: per_ip,
            ip_allowlist: allowlist
                .iter()
                .map(|(ip, cap)| (ip.to_string(), *cap))
                .collect(),
        }))
    }

    #[test]
    fn global_cap_counts_both_stream_kinds() {
        let c = controller(2, 10);
        let p1 = c.try_admit(addr("10.0.0.1:1000"), StreamKind::Plain);
        let p2 = c.try_admit(addr("10.0.0.2:1000"), StreamKind::Tls);
        assert!(p1.is_some());
        assert!(p2.is_some());
        assert!(c.try_admit(addr("10.0.0.3:1000"), StreamKind::Plain).is_none());
        assert!(c.try_admit(addr("10.0.0.3:1000"), StreamKind::Tls).is_none());
        assert_eq!(c.registered(), 2);
    }

    #[test]
    fn per_ip_cap_applies_without_allowlist_entry() {
        let c = controller(100, 2);
        let _p1 = c.try_admit(addr("10.0.0.1:1000"), StreamKind::Plain).unwrap();
        let _p2 = c.try_admit(addr("10.0.0.1:1001"), StreamKind::Plain).unwrap();
        assert!(c.try_admit(addr("10.0.0.1:1002"), StreamKind::Plain).is_none());
        // Other IPs are unaffected.
        assert!(c.try_admit(addr("10.0.0.2:1000"), StreamKind::Plain).is_some());
    }

    #[test]
    fn allowlist_raises_the_per_ip_cap() {
        let c = controller_with_allowlist(100, 1, &[("10.0.0.1", 3)]);
        let _p1 = c.try_admit(addr("10.0.0.1:1000"), StreamKind::Plain).unwrap();
        let _p2 = c.try_admit(addr("10.0.0.1:1001"), StreamKind::Plain).unwrap();
        let _p3 = c.try_admit(addr("10.0.0.1:1002"), StreamKind::Plain).unwrap();
        assert!(c.try_admit(addr("10.0.0.1:1003"), StreamKind::Plain).is_none());

        // An IP without an entry is still capped at the default.
        let _q1 = c.try_admit(addr("10.0.0.2:1000"), StreamKind::Plain).unwrap();
        assert!(c.try_admit(addr("10.0.0.2:1001"), StreamKind::Plain).is_none());
    }

    #[test]
    fn allowlist_below_the_default_cap_grants_nothing_extra() {
        let c = controller_with_allowlist(100, 2, &[("10.0.0.1", 1)]);
        let _p1 = c.try_admit(addr("10.0.0.1:1000"), StreamKind::Plain).unwrap();
        let _p2 = c.try_admit(addr("10.0.0.1:1001"), StreamKind::Plain).unwrap();
        assert!(c.try_admit(addr("10.0.0.1:1002"), StreamKind::Plain).is_none());
    }

    #[test]
    fn release_restores_counters_and_prunes_zero_entries() {
        let c = controller(100, 10);
        let p1 = c.try_admit(addr("10.0.0.1:1000"), StreamKind::Plain).unwrap();
        let p2 = c.try_admit(addr("10.0.0.1:1001"), StreamKind::Tls).unwrap();
        assert_eq!(
            c.stats(),
            AdmissionStats { plain: 1, tls: 1, ips: 1, per_ip_total: 2 }
        );

        drop(p1);
        assert_eq!(
            c.stats(),
            AdmissionStats { plain: 0, tls: 1, ips: 1, per_ip_total: 1 }
        );

        drop(p2);
        assert_eq!(
            c.stats(),
            AdmissionStats { plain: 0, tls: 0, ips: 0, per_ip_total: 0 }
        );
    }

    #[test]
    fn counters_always_match_registrations() {
        let c = controller(100, 10);
        let mut permits = Vec::new();
        for port in 0..5u16 {
            for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
                let kind = if port % 2 == 0 { StreamKind::Plain } else { StreamKind::Tls };
                permits.push(c.try_admit(addr(&format!("{ip}:{}", 1000 + port)), kind).unwrap());
            }
        }
        let stats = c.stats();
        assert_eq!(stats.per_ip_total, stats.plain + stats.tls);

        permits.truncate(7);
        let stats = c.stats();
        assert_eq!(stats.per_ip_total, stats.plain + stats.tls);
        assert_eq!(stats.per_ip_total, 7);
    }

    #[test]
    fn force_close_cancels_tokens_and_clears_registries() {
        let c = controller(100, 10);
        let p1 = c.try_admit(addr("10.0.0.1:1000"), StreamKind::Plain).unwrap();
        let p2 = c.try_admit(addr("10.0.0.2:1000"), StreamKind::Tls).unwrap();
        let t1 = p1.close_signal();
        let t2 = p2.close_signal();

        assert_eq!(c.force_close_all(), 2);
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
        assert_eq!(c.registered(), 0);

        // Close callbacks still settle the IP counters.
        drop(p1);
        drop(p2);
        assert_eq!(
            c.stats(),
            AdmissionStats { plain: 0, tls: 0, ips: 0, per_ip_total: 0 }
        );
    }

    #[test]
    fn concurrent_admissions_never_exceed_the_global_cap() {
        let c = controller(8, 4);
        let admitted = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..32u16 {
            let c = Arc::clone(&c);
            let admitted = Arc::clone(&admitted);
            handles.push(std::thread::spawn(move || {
                let peer = SocketAddr::from((
                    [10, 0, (i / 4) as u8 + 1, (i % 4) as u8 + 1],
                    40_000 + i,
                ));
                if let Some(permit) = c.try_admit(peer, StreamKind::Plain) {
                    admitted.lock().unwrap().push(permit);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.lock().unwrap().len(), 8);
        assert_eq!(c.registered(), 8);
    }
}
