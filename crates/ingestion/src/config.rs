//! Poll configuration and metrics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{IngestionError, Result};

/// Poll loop configuration
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Events requested from the device per poll
    pub poll_limit: usize,

    /// Capacity of each batch buffer (raw plus derived events)
    pub buffer_capacity: usize,

    /// Stop after this many non-empty batches
    pub max_batches: Option<u64>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_limit: 128,
            buffer_capacity: 256,
            max_batches: None,
        }
    }
}

impl PollConfig {
    /// Create new poll configuration
    pub fn new(poll_limit: usize, buffer_capacity: usize) -> Self {
        Self {
            poll_limit,
            buffer_capacity,
            max_batches: None,
        }
    }

    pub fn with_max_batches(mut self, max_batches: Option<u64>) -> Self {
        self.max_batches = max_batches;
        self
    }

    /// Reject limits the buffer cannot hold
    pub fn validate(&self) -> Result<()> {
        if self.poll_limit == 0 {
            return Err(IngestionError::invalid_config("poll_limit must be > 0"));
        }
        if self.poll_limit > self.buffer_capacity {
            return Err(IngestionError::invalid_config(format!(
                "poll_limit {} exceeds buffer capacity {}",
                self.poll_limit, self.buffer_capacity
            )));
        }
        Ok(())
    }
}

/// Ingestion metrics
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Device polls issued
    pub polls: AtomicU64,

    /// Polls that returned no events
    pub empty_polls: AtomicU64,

    /// Batches forwarded to the engine
    pub batches: AtomicU64,

    /// Events forwarded to the engine
    pub events: AtomicU64,

    /// Largest batch seen
    pub max_batch: AtomicUsize,

    /// Device errors
    pub device_errors: AtomicU64,
}

impl IngestionMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one poll and the number of events it returned
    pub fn record_poll(&self, events: usize) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if events == 0 {
            self.empty_polls.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a batch handed downstream
    pub fn record_batch(&self, events: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.events.fetch_add(events as u64, Ordering::Relaxed);
        self.max_batch.fetch_max(events, Ordering::Relaxed);
    }

    /// Record device error
    pub fn record_device_error(&self) {
        self.device_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            max_batch: self.max_batch.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub polls: u64,
    pub empty_polls: u64,
    pub batches: u64,
    pub events: u64,
    pub max_batch: usize,
    pub device_errors: u64,
}
