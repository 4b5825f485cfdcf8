//! Test doubles for the engine collaborators

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use contracts::{
    DeviceError, DeviceMode, EventBuffer, EventTransport, SensorDevice, SensorEvent, SensorHandle,
    TransportError, WakeLockPrimitive, WritableFuture,
};

// ===== Transport =====

#[derive(Debug, Default)]
struct TransportState {
    writes: Vec<Vec<SensorEvent>>,
    blocked: bool,
    closed: bool,
    block_after: Option<usize>,
}

/// Transport whose back-pressure is scripted by the test
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_blocked(&self, blocked: bool) {
        let mut state = self.state.lock().unwrap();
        state.blocked = blocked;
        state.block_after = None;
    }

    /// Accept `n` more writes, then start blocking
    pub fn block_after_writes(&self, n: usize) {
        self.state.lock().unwrap().block_after = Some(n);
    }

    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().writes.len()
    }

    /// Every event written so far, in write order
    pub fn written_events(&self) -> Vec<SensorEvent> {
        self.state
            .lock()
            .unwrap()
            .writes
            .iter()
            .flatten()
            .copied()
            .collect()
    }
}

impl EventTransport for MockTransport {
    fn try_write(&mut self, events: &[SensorEvent]) -> Result<usize, TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.blocked {
            return Err(TransportError::WouldBlock);
        }
        if let Some(left) = state.block_after {
            if left == 0 {
                state.blocked = true;
                state.block_after = None;
                return Err(TransportError::WouldBlock);
            }
            state.block_after = Some(left - 1);
        }
        state.writes.push(events.to_vec());
        Ok(events.len())
    }

    fn writable(&self) -> WritableFuture {
        Box::pin(async { Ok(()) })
    }
}

// ===== Wake lock =====

#[derive(Debug, Clone, Default)]
pub struct CountingWakeLock {
    acquires: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl CountingWakeLock {
    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl WakeLockPrimitive for CountingWakeLock {
    fn acquire(&self, _name: &str) {
        self.acquires.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self, _name: &str) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

// ===== Device =====

#[derive(Debug, Default)]
struct DeviceState {
    active: BTreeSet<SensorHandle>,
    rates: BTreeMap<SensorHandle, (Duration, Duration)>,
    flush_requests: BTreeMap<SensorHandle, usize>,
    flush_unsupported: BTreeSet<SensorHandle>,
    fail_activate: bool,
    fail_set_mode: bool,
    mode: DeviceMode,
    injected: Vec<SensorEvent>,
}

/// Device that records control calls. `poll` never yields events; tests
/// hand batches to the engine directly.
#[derive(Debug, Default)]
pub struct RecordingDevice {
    state: Mutex<DeviceState>,
}

impl RecordingDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_active(&self, handle: SensorHandle) -> bool {
        self.state.lock().unwrap().active.contains(&handle)
    }

    pub fn rate(&self, handle: SensorHandle) -> Option<(Duration, Duration)> {
        self.state.lock().unwrap().rates.get(&handle).copied()
    }

    pub fn flush_requests(&self, handle: SensorHandle) -> usize {
        self.state
            .lock()
            .unwrap()
            .flush_requests
            .get(&handle)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_flush_unsupported(&self, handle: SensorHandle) {
        self.state.lock().unwrap().flush_unsupported.insert(handle);
    }

    pub fn fail_activate(&self, fail: bool) {
        self.state.lock().unwrap().fail_activate = fail;
    }

    pub fn fail_set_mode(&self, fail: bool) {
        self.state.lock().unwrap().fail_set_mode = fail;
    }

    pub fn mode(&self) -> DeviceMode {
        self.state.lock().unwrap().mode
    }

    pub fn injected(&self) -> Vec<SensorEvent> {
        self.state.lock().unwrap().injected.clone()
    }
}

impl SensorDevice for RecordingDevice {
    fn poll(&self, _buffer: &mut EventBuffer, _max_count: usize) -> Result<usize, DeviceError> {
        Ok(0)
    }

    fn activate(&self, handle: SensorHandle, enabled: bool) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        if enabled {
            if state.fail_activate {
                return Err(DeviceError::Io("activate refused".into()));
            }
            state.active.insert(handle);
        } else {
            state.active.remove(&handle);
        }
        Ok(())
    }

    fn set_delay(&self, handle: SensorHandle, period: Duration) -> Result<(), DeviceError> {
        self.state
            .lock()
            .unwrap()
            .rates
            .insert(handle, (period, Duration::ZERO));
        Ok(())
    }

    fn batch(
        &self,
        handle: SensorHandle,
        period: Duration,
        max_latency: Duration,
    ) -> Result<(), DeviceError> {
        self.state
            .lock()
            .unwrap()
            .rates
            .insert(handle, (period, max_latency));
        Ok(())
    }

    fn flush(&self, handle: SensorHandle) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        if state.flush_unsupported.contains(&handle) {
            return Err(DeviceError::Unsupported);
        }
        *state.flush_requests.entry(handle).or_insert(0) += 1;
        Ok(())
    }

    fn inject(&self, event: SensorEvent) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        if state.mode != DeviceMode::DataInjection {
            return Err(DeviceError::Unsupported);
        }
        state.injected.push(event);
        Ok(())
    }

    fn set_mode(&self, mode: DeviceMode) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_set_mode {
            return Err(DeviceError::Io("set_mode refused".into()));
        }
        state.mode = mode;
        Ok(())
    }
}
