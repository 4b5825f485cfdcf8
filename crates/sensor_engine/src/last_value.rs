//! Last-value cache
//!
//! Small per-sensor ring of the most recent events. Used to hydrate a late
//! subscriber of an on-change sensor and for status dumps.

use std::collections::HashMap;
use std::fmt;

use contracts::{SensorEvent, SensorHandle, SensorType};
use ringbuf::{traits::*, HeapRb};

/// Default ring depth per sensor
pub const DEFAULT_RING_SIZE: usize = 10;

/// Deeper ring for sensors whose history matters in dumps
pub const EXTENDED_RING_SIZE: usize = DEFAULT_RING_SIZE * 5;

/// Ring depth for a sensor type
pub fn ring_size_for(sensor_type: SensorType) -> usize {
    match sensor_type {
        SensorType::Accelerometer | SensorType::StepCounter | SensorType::SignificantMotion => {
            EXTENDED_RING_SIZE
        }
        _ => DEFAULT_RING_SIZE,
    }
}

/// Per-sensor ring buffers of recent events
#[derive(Default)]
pub struct LastValueCache {
    rings: HashMap<SensorHandle, HeapRb<SensorEvent>>,
}

impl fmt::Debug for LastValueCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LastValueCache")
            .field("sensors", &self.rings.len())
            .finish()
    }
}

impl LastValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event, overwriting the oldest entry when the ring is full.
    ///
    /// Flush-complete markers are not values and are ignored.
    #[inline]
    pub fn record(&mut self, event: &SensorEvent) {
        if event.is_flush_complete() {
            return;
        }
        let ring = self
            .rings
            .entry(event.sensor)
            .or_insert_with(|| HeapRb::new(ring_size_for(event.sensor_type)));
        if ring.is_full() {
            let _ = ring.try_pop();
        }
        let mut copy = *event;
        copy.needs_ack = false;
        let _ = ring.try_push(copy);
    }

    /// Most recent event for a sensor
    pub fn latest(&self, handle: SensorHandle) -> Option<SensorEvent> {
        self.rings.get(&handle).and_then(|ring| ring.iter().last().copied())
    }

    /// Recent events for a sensor, oldest first
    pub fn recent(&self, handle: SensorHandle) -> Vec<SensorEvent> {
        self.rings
            .get(&handle)
            .map(|ring| ring.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of events held for a sensor
    pub fn depth(&self, handle: SensorHandle) -> usize {
        self.rings
            .get(&handle)
            .map(|ring| ring.occupied_len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light(ts: i64, lux: f32) -> SensorEvent {
        SensorEvent::sample(SensorHandle(5), SensorType::Light, ts, &[lux])
    }

    #[test]
    fn test_latest_returns_newest() {
        let mut cache = LastValueCache::new();
        assert!(cache.latest(SensorHandle(5)).is_none());
        cache.record(&light(1, 10.0));
        cache.record(&light(2, 20.0));
        let latest = cache.latest(SensorHandle(5)).unwrap();
        assert_eq!(latest.timestamp, 2);
        assert_eq!(latest.values()[0], 20.0);
    }

    #[test]
    fn test_ring_overwrites_oldest() {
        let mut cache = LastValueCache::new();
        for ts in 0..25 {
            cache.record(&light(ts, ts as f32));
        }
        assert_eq!(cache.depth(SensorHandle(5)), DEFAULT_RING_SIZE);
        let recent = cache.recent(SensorHandle(5));
        assert_eq!(recent.first().unwrap().timestamp, 15);
        assert_eq!(recent.last().unwrap().timestamp, 24);
    }

    #[test]
    fn test_extended_ring_for_accelerometer() {
        let mut cache = LastValueCache::new();
        for ts in 0..60 {
            cache.record(&SensorEvent::sample(
                SensorHandle(1),
                SensorType::Accelerometer,
                ts,
                &[0.0, 0.0, 9.8],
            ));
        }
        assert_eq!(cache.depth(SensorHandle(1)), EXTENDED_RING_SIZE);
    }

    #[test]
    fn test_flush_markers_ignored() {
        let mut cache = LastValueCache::new();
        cache.record(&SensorEvent::flush_complete(SensorHandle(5), 1));
        assert_eq!(cache.depth(SensorHandle(5)), 0);
    }

    #[test]
    fn test_ack_flag_not_recorded() {
        let mut cache = LastValueCache::new();
        let mut event = light(1, 3.0);
        event.needs_ack = true;
        cache.record(&event);
        assert!(!cache.latest(SensorHandle(5)).unwrap().needs_ack);
    }
}
