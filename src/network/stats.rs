//! Server statistics
//!
//! Plain relaxed atomics, written by the network loop and readable from
//! any thread through a shared `Arc<ServerStats>`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ServerStats {
    pub(crate) messages_received: AtomicU64,
    pub(crate) messages_routed: AtomicU64,
    pub(crate) messages_dropped: AtomicU64,
    pub(crate) bytes_received: AtomicU64,
    pub(crate) bytes_sent: AtomicU64,
    pub(crate) connections_total: AtomicU64,
    pub(crate) connections_active: AtomicU64,
    pub(crate) connections_rejected: AtomicU64,
    pub(crate) protocol_errors: AtomicU64,
}

#[inline(always)]
pub(crate) fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy every counter. Counters are read one by one, so the snapshot
    /// is not atomic as a whole.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            messages_received: load(&self.messages_received),
            messages_routed: load(&self.messages_routed),
            messages_dropped: load(&self.messages_dropped),
            bytes_received: load(&self.bytes_received),
            bytes_sent: load(&self.bytes_sent),
            connections_total: load(&self.connections_total),
            connections_active: load(&self.connections_active),
            connections_rejected: load(&self.connections_rejected),
            protocol_errors: load(&self.protocol_errors),
        }
    }

    pub(crate) fn client_left(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_received: u64,
    /// Outbound messages delivered to at least one client
    pub messages_routed: u64,
    /// Unknown callee, or no room in a frame buffer
    pub messages_dropped: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub connections_total: u64,
    pub connections_active: u64,
    /// Accepts turned away because the server was full
    pub connections_rejected: u64,
    pub protocol_errors: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in={} routed={} dropped={} bytes_in={} bytes_out={} clients={}/{} rejected={} protocol_errors={}",
            self.messages_received,
            self.messages_routed,
            self.messages_dropped,
            self.bytes_received,
            self.bytes_sent,
            self.connections_active,
            self.connections_total,
            self.connections_rejected,
            self.protocol_errors,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = ServerStats::new();
        bump(&stats.connections_total, 2);
        bump(&stats.connections_active, 2);
        stats.client_left();
        bump(&stats.bytes_sent, 128);

        let snap = stats.snapshot();
        assert_eq!(snap.connections_total, 2);
        assert_eq!(snap.connections_active, 1);
        assert_eq!(snap.bytes_sent, 128);
        assert_eq!(snap.messages_dropped, 0);
        assert!(snap.to_string().contains("clients=1/2"));
    }
}
