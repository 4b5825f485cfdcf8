//! Wake-lock arbitration
//!
//! One process-wide wake lock, held iff some live connection still owes
//! acknowledgments for wake-up events. The arbitrator only tracks the held
//! state and talks to the primitive on transitions; the per-connection counts
//! live on the connections.
//!
//! The held flag is published on a `watch` channel so a watchdog task can
//! sleep until the lock is taken. Acknowledgments, drains of cached wake-up
//! events and a fresh acquisition bump an activity generation; polled
//! batches do not. A watchdog tick that sees the same generation twice while
//! the lock is held reports it stuck.

use contracts::WakeLockPrimitive;
use tokio::sync::watch;
use tracing::{debug, info};

/// Result of one watchdog tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// Lock not held, nothing to check
    Idle,
    /// Activity observed since the previous tick
    Progressing,
    /// Held without any activity for a full interval
    Stuck,
}

/// Owner of the process-wide wake lock
pub struct WakeLockArbitrator {
    primitive: Box<dyn WakeLockPrimitive>,
    name: String,
    held: bool,
    generation: u64,
    last_observed: u64,
    held_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for WakeLockArbitrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeLockArbitrator")
            .field("name", &self.name)
            .field("held", &self.held)
            .field("generation", &self.generation)
            .finish()
    }
}

impl WakeLockArbitrator {
    pub fn new(primitive: Box<dyn WakeLockPrimitive>, name: impl Into<String>) -> Self {
        let (held_tx, _) = watch::channel(false);
        Self {
            primitive,
            name: name.into(),
            held: false,
            generation: 0,
            last_observed: 0,
            held_tx,
        }
    }

    #[inline]
    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receiver that observes every held-state transition
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.held_tx.subscribe()
    }

    /// Take the lock. Returns true on a released → held transition.
    pub fn acquire(&mut self) -> bool {
        if self.held {
            return false;
        }
        // a new hold gets a full interval before it can be judged stuck
        self.note_activity();
        self.primitive.acquire(&self.name);
        self.held = true;
        self.held_tx.send_replace(true);
        observability::record_wake_lock_held(true);
        debug!(name = %self.name, "wake lock acquired");
        true
    }

    /// Drop the lock. Returns true on a held → released transition.
    pub fn release(&mut self) -> bool {
        if !self.held {
            return false;
        }
        self.primitive.release(&self.name);
        self.held = false;
        self.held_tx.send_replace(false);
        observability::record_wake_lock_held(false);
        debug!(name = %self.name, "wake lock released");
        true
    }

    /// Bring the held state in line with whether any connection needs it
    pub fn reconcile(&mut self, needed: bool) {
        if needed {
            self.acquire();
        } else {
            self.release();
        }
    }

    /// Record acknowledgment-side progress
    #[inline]
    pub fn note_activity(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// Compare activity against the previous tick
    pub fn watchdog_check(&mut self) -> WatchdogVerdict {
        if !self.held {
            self.last_observed = self.generation;
            return WatchdogVerdict::Idle;
        }
        if self.generation == self.last_observed {
            return WatchdogVerdict::Stuck;
        }
        self.last_observed = self.generation;
        WatchdogVerdict::Progressing
    }
}

/// Wake-lock primitive that only logs transitions, for hosts without one
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingWakeLock;

impl WakeLockPrimitive for TracingWakeLock {
    fn acquire(&self, name: &str) {
        info!(name, "acquire wake lock");
    }

    fn release(&self, name: &str) {
        info!(name, "release wake lock");
    }
}
