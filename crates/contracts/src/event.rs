//! SensorEvent - the unit flowing from device to clients
//!
//! Events are `Copy`: every connection works on its own copy, so flagging an
//! event for acknowledgment on one connection is never visible to another.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

use crate::{BufferFull, SensorHandle, SensorType};

/// Number of `f32` slots in an event payload
pub const MAX_EVENT_VALUES: usize = 16;

/// Size of one event on the client wire, used to convert socket buffer bytes
/// into event counts
pub const EVENT_WIRE_SIZE: usize = 104;

/// Event payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    /// Sample values, unused slots are zero
    Values([f32; MAX_EVENT_VALUES]),
    /// Step counter total
    StepCount(u64),
    /// All previously buffered samples for `target` have been delivered
    FlushComplete { target: SensorHandle },
}

/// One sensor event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorEvent {
    pub sensor: SensorHandle,
    pub sensor_type: SensorType,
    /// Nanoseconds on the device clock
    pub timestamp: i64,
    pub payload: EventPayload,
    /// Set during dispatch on wake-up events the client must acknowledge
    pub needs_ack: bool,
}

impl SensorEvent {
    /// Create a sample event; values beyond [`MAX_EVENT_VALUES`] are ignored
    pub fn sample(
        sensor: SensorHandle,
        sensor_type: SensorType,
        timestamp: i64,
        values: &[f32],
    ) -> Self {
        let mut data = [0.0f32; MAX_EVENT_VALUES];
        let n = values.len().min(MAX_EVENT_VALUES);
        data[..n].copy_from_slice(&values[..n]);
        Self {
            sensor,
            sensor_type,
            timestamp,
            payload: EventPayload::Values(data),
            needs_ack: false,
        }
    }

    /// Create a step counter event
    pub fn step_count(sensor: SensorHandle, timestamp: i64, steps: u64) -> Self {
        Self {
            sensor,
            sensor_type: SensorType::StepCounter,
            timestamp,
            payload: EventPayload::StepCount(steps),
            needs_ack: false,
        }
    }

    /// Create a flush-complete marker for `target`
    pub fn flush_complete(target: SensorHandle, timestamp: i64) -> Self {
        Self {
            sensor: target,
            sensor_type: SensorType::MetaData,
            timestamp,
            payload: EventPayload::FlushComplete { target },
            needs_ack: false,
        }
    }

    /// Handle used for subscription filtering.
    ///
    /// Flush-complete markers are keyed by their embedded target.
    #[inline]
    pub fn target_handle(&self) -> SensorHandle {
        match self.payload {
            EventPayload::FlushComplete { target } => target,
            _ => self.sensor,
        }
    }

    #[inline]
    pub fn is_flush_complete(&self) -> bool {
        matches!(self.payload, EventPayload::FlushComplete { .. })
    }

    /// Sample values, empty for non-sample payloads
    pub fn values(&self) -> &[f32] {
        match &self.payload {
            EventPayload::Values(data) => data,
            _ => &[],
        }
    }
}

/// Fixed-capacity event buffer.
///
/// The capacity is set once at construction and `push` refuses to grow past
/// it, so a poll limit sized against virtual-sensor fan-out can be checked
/// rather than assumed.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    events: Vec<SensorEvent>,
    capacity: usize,
}

impl EventBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots left
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.events.len()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.events.len() >= self.capacity
    }

    /// Append one event
    ///
    /// # Errors
    /// Returns [`BufferFull`] when the buffer is at capacity.
    pub fn push(&mut self, event: SensorEvent) -> Result<(), BufferFull> {
        if self.is_full() {
            return Err(BufferFull {
                capacity: self.capacity,
            });
        }
        self.events.push(event);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Reset per-dispatch flags on every event
    pub fn clear_transient_flags(&mut self) {
        for event in &mut self.events {
            event.needs_ack = false;
        }
    }

    /// Sort by timestamp. Not stable: equal timestamps may reorder.
    pub fn sort_by_timestamp(&mut self) {
        self.events.sort_unstable_by_key(|e| e.timestamp);
    }

    /// Drain all events, leaving the buffer empty with its capacity intact
    pub fn take(&mut self) -> Vec<SensorEvent> {
        std::mem::replace(&mut self.events, Vec::with_capacity(self.capacity))
    }
}

impl Deref for EventBuffer {
    type Target = [SensorEvent];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.events
    }
}

impl DerefMut for EventBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accel(ts: i64) -> SensorEvent {
        SensorEvent::sample(SensorHandle(1), SensorType::Accelerometer, ts, &[0.0, 0.0, 9.8])
    }

    #[test]
    fn test_buffer_refuses_past_capacity() {
        let mut buf = EventBuffer::with_capacity(2);
        assert!(buf.push(accel(1)).is_ok());
        assert!(buf.push(accel(2)).is_ok());
        assert_eq!(buf.push(accel(3)), Err(BufferFull { capacity: 2 }));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_take_keeps_capacity() {
        let mut buf = EventBuffer::with_capacity(4);
        buf.push(accel(1)).unwrap();
        let taken = buf.take();
        assert_eq!(taken.len(), 1);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 4);
    }

    #[test]
    fn test_flush_complete_targets_embedded_handle() {
        let event = SensorEvent::flush_complete(SensorHandle(9), 100);
        assert!(event.is_flush_complete());
        assert_eq!(event.target_handle(), SensorHandle(9));
        assert!(event.values().is_empty());
    }

    #[test]
    fn test_sort_by_timestamp() {
        let mut buf = EventBuffer::with_capacity(3);
        buf.push(accel(30)).unwrap();
        buf.push(accel(10)).unwrap();
        buf.push(accel(20)).unwrap();
        buf.sort_by_timestamp();
        let ts: Vec<i64> = buf.iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![10, 20, 30]);
    }

    #[test]
    fn test_clear_transient_flags() {
        let mut buf = EventBuffer::with_capacity(1);
        let mut event = accel(1);
        event.needs_ack = true;
        buf.push(event).unwrap();
        buf.clear_transient_flags();
        assert!(!buf[0].needs_ack);
    }
}
