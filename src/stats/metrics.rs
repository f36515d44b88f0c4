//! Statistics and metrics for the server

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients that received the whole payload
    pub delivered: usize,
    /// Recipients whose send failed (each is now closed)
    pub failed: usize,
    /// Recipients detached before their turn, left untouched
    pub skipped: usize,
}

impl BroadcastReport {
    /// Number of clients registered when the broadcast started
    pub fn recipients(&self) -> usize {
        self.delivered + self.failed + self.skipped
    }
}

/// Why an accepted connection was closed before registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// `max_connections` was reached
    Limit,
    /// The admission callback refused it
    Handler,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Limit => write!(f, "limit"),
            RejectReason::Handler => write!(f, "handler"),
        }
    }
}

/// Server-wide statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Connections accepted by the listener
    pub total_connections: u64,
    /// Connections closed before registration (limit or admission callback)
    pub rejected_connections: u64,
    /// Of those, rejected because the connection limit was reached
    pub rejected_at_limit: u64,
    /// Currently registered clients
    pub active_connections: u64,
    /// Client workers that have finished
    pub disconnected: u64,
    /// Broadcasts performed
    pub broadcasts: u64,
    /// Payload bytes delivered by broadcasts, summed over recipients
    pub total_bytes_broadcast: u64,
    /// Broadcast sends that failed
    pub broadcast_failures: u64,
    /// Broadcast recipients skipped because they were detached
    pub broadcast_skipped: u64,
    /// Time since the metrics were created
    pub uptime: Duration,
}

/// Live counters shared by the accept loop, workers and broadcasts
#[derive(Debug)]
pub struct ServerMetrics {
    started_at: Instant,
    accepted: AtomicU64,
    rejected: AtomicU64,
    rejected_at_limit: AtomicU64,
    disconnected: AtomicU64,
    broadcasts: AtomicU64,
    bytes_broadcast: AtomicU64,
    broadcast_failures: AtomicU64,
    broadcast_skipped: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            rejected_at_limit: AtomicU64::new(0),
            disconnected: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            bytes_broadcast: AtomicU64::new(0),
            broadcast_failures: AtomicU64::new(0),
            broadcast_skipped: AtomicU64::new(0),
        }
    }

    pub fn record_accept(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reject(&self, reason: RejectReason) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        if reason == RejectReason::Limit {
            self.rejected_at_limit.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_disconnect(&self) {
        self.disconnected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast(&self, report: &BroadcastReport, payload_len: usize) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.bytes_broadcast
            .fetch_add((report.delivered * payload_len) as u64, Ordering::Relaxed);
        self.broadcast_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.broadcast_skipped
            .fetch_add(report.skipped as u64, Ordering::Relaxed);
    }

    /// Capture the counters, with the given number of registered clients
    pub fn snapshot(&self, active_connections: usize) -> ServerStats {
        ServerStats {
            total_connections: self.accepted.load(Ordering::Relaxed),
            rejected_connections: self.rejected.load(Ordering::Relaxed),
            rejected_at_limit: self.rejected_at_limit.load(Ordering::Relaxed),
            active_connections: active_connections as u64,
            disconnected: self.disconnected.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            total_bytes_broadcast: self.bytes_broadcast.load(Ordering::Relaxed),
            broadcast_failures: self.broadcast_failures.load(Ordering::Relaxed),
            broadcast_skipped: self.broadcast_skipped.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
