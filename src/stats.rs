//! Process-wide connection and traffic statistics
//!
//! All counters are atomics updated concurrently by every session. Readers get
//! an eventually consistent snapshot, never a transactional view.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Shared statistics registry
#[derive(Debug)]
pub struct Stats {
    active_connections: AtomicU64,
    total_connections: AtomicU64,
    /// Bytes read from any proxied socket
    incoming_bytes: AtomicU64,
    /// Bytes written to any proxied socket
    outgoing_bytes: AtomicU64,
    started_at: Instant,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub active_connections: u64,
    pub total_connections: u64,
    pub incoming_bytes: u64,
    pub outgoing_bytes: u64,
    pub uptime_secs: u64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            active_connections: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            incoming_bytes: AtomicU64::new(0),
            outgoing_bytes: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Register a freshly accepted connection
    #[inline]
    pub fn new_connection(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Release a connection. Saturates at zero.
    #[inline]
    pub fn close_connection(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    #[inline]
    pub fn add_incoming_traffic(&self, bytes: u64) {
        self.incoming_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_outgoing_traffic(&self, bytes: u64) {
        self.outgoing_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Acquire)
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_connections: self.active_connections.load(Ordering::Acquire),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            incoming_bytes: self.incoming_bytes.load(Ordering::Relaxed),
            outgoing_bytes: self.outgoing_bytes.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}
