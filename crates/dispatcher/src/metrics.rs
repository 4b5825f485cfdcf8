//! Runtime metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use contracts::BatchReport;

/// Counters maintained by the engine task
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    /// Commands handled
    commands: AtomicU64,
    /// Commands answered with an error
    command_failures: AtomicU64,
    /// Batches dispatched
    batches: AtomicU64,
    /// Events written to client transports
    events_delivered: AtomicU64,
    /// Events dropped from connection caches
    events_dropped: AtomicU64,
    /// Connections opened
    connections_opened: AtomicU64,
    /// Connections closed or hung up
    connections_closed: AtomicU64,
    /// Watchdog force releases
    watchdog_releases: AtomicU64,
    /// Live connections
    live_connections: AtomicUsize,
}

impl RuntimeMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one handled command
    pub fn record_command(&self, success: bool) {
        self.commands.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.command_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one dispatched batch
    pub fn record_batch(&self, report: &BatchReport) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.events_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.events_dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
    }

    pub fn inc_connections_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connections_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_watchdog_releases(&self) {
        self.watchdog_releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_live_connections(&self, count: usize) {
        self.live_connections.store(count, Ordering::Relaxed);
    }

    /// Get batch count
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands: self.commands.load(Ordering::Relaxed),
            command_failures: self.command_failures.load(Ordering::Relaxed),
            batches: self.batches(),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            watchdog_releases: self.watchdog_releases.load(Ordering::Relaxed),
            live_connections: self.live_connections.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of runtime metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub commands: u64,
    pub command_failures: u64,
    pub batches: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub watchdog_releases: u64,
    pub live_connections: usize,
}
