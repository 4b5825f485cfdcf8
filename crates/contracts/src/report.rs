//! BatchReport - per-batch dispatch bookkeeping
//!
//! Produced by the engine for every processed batch and consumed by the
//! metrics layer and the CLI summary.

use serde::{Deserialize, Serialize};

/// What happened to one polled batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Monotonic batch sequence number
    pub batch_id: u64,
    /// Events read from the device
    pub polled: usize,
    /// Derived events appended by virtual sensors
    pub synthesized: usize,
    /// Flush-complete markers in the batch
    pub flush_markers: usize,
    /// Flush markers with no waiting connection
    pub unattributed_flushes: usize,
    /// Live connections the batch was offered to
    pub connections: usize,
    /// Events handed to transports
    pub delivered: usize,
    /// Events parked in connection caches
    pub cached: usize,
    /// Events dropped on cache overflow
    pub dropped: usize,
    /// Trivial flush completions written
    pub flush_synthesized: usize,
    /// One-shot subscriptions cleared after firing
    pub one_shot_disabled: usize,
    /// Wake lock state after dispatch
    pub wake_lock_held: bool,
}

impl BatchReport {
    /// Total events in the merged batch
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.polled + self.synthesized
    }
}
