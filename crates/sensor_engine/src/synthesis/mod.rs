//! Virtual sensor synthesis
//!
//! Owns the set of active virtual sensors and expands a raw batch with their
//! derived events.

mod gravity;

pub use gravity::{build_virtual_sensor, GravitySensor, LinearAccelerationSensor, LowPassFilter};

use std::collections::BTreeSet;

use contracts::{EventBuffer, FusionSink, SensorHandle};
use tracing::{trace, warn};

use crate::last_value::LastValueCache;
use crate::registry::SensorRegistry;

/// Active-virtual set plus the optional fusion sink
#[derive(Default)]
pub struct VirtualSynthesizer {
    active: BTreeSet<SensorHandle>,
    fusion: Option<Box<dyn FusionSink>>,
    overflow_dropped: u64,
}

impl std::fmt::Debug for VirtualSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualSynthesizer")
            .field("active", &self.active)
            .field("has_fusion", &self.fusion.is_some())
            .field("overflow_dropped", &self.overflow_dropped)
            .finish()
    }
}

impl VirtualSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a fusion sink fed with every raw event while any virtual sensor is active
    pub fn with_fusion(mut self, fusion: Box<dyn FusionSink>) -> Self {
        self.fusion = Some(fusion);
        self
    }

    /// Mark a virtual sensor active. Returns false if it already was.
    pub fn activate(&mut self, handle: SensorHandle, registry: &mut SensorRegistry) -> bool {
        if !self.active.insert(handle) {
            return false;
        }
        if let Some(vs) = registry.get_mut(handle).and_then(|e| e.virtual_impl_mut()) {
            vs.set_active(true);
        }
        true
    }

    /// Drop a virtual sensor from the active set
    pub fn deactivate(&mut self, handle: SensorHandle, registry: &mut SensorRegistry) -> bool {
        if !self.active.remove(&handle) {
            return false;
        }
        if let Some(vs) = registry.get_mut(handle).and_then(|e| e.virtual_impl_mut()) {
            vs.set_active(false);
        }
        true
    }

    #[inline]
    pub fn has_active(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn is_active(&self, handle: SensorHandle) -> bool {
        self.active.contains(&handle)
    }

    pub fn active_handles(&self) -> impl Iterator<Item = SensorHandle> + '_ {
        self.active.iter().copied()
    }

    /// Derived events that did not fit in the poll buffer
    pub fn overflow_dropped(&self) -> u64 {
        self.overflow_dropped
    }

    /// Run every raw event through the fusion sink and the active virtual
    /// sensors, append what they produce, then re-sort the batch by timestamp.
    ///
    /// Returns the number of derived events appended. The batch is only
    /// re-sorted when something was appended; that sort is unstable, so
    /// events with equal timestamps may swap.
    pub fn synthesize(
        &mut self,
        batch: &mut EventBuffer,
        registry: &mut SensorRegistry,
        last_values: &mut LastValueCache,
    ) -> usize {
        if self.active.is_empty() {
            return 0;
        }

        let raw_count = batch.len();
        if let Some(fusion) = self.fusion.as_mut() {
            for raw in batch[..raw_count].iter() {
                if let Err(e) = fusion.process(raw) {
                    trace!(handle = %raw.sensor, error = %e, "fusion rejected event");
                }
            }
        }

        let mut appended = 0;
        for i in 0..raw_count {
            let raw = batch[i];
            if raw.is_flush_complete() {
                continue;
            }
            for &handle in &self.active {
                let Some(entry) = registry.get_mut(handle) else {
                    continue;
                };
                let sensor_type = entry.descriptor().sensor_type;
                let Some(vs) = entry.virtual_impl_mut() else {
                    continue;
                };
                let Some(mut derived) = vs.process(&raw) else {
                    continue;
                };
                derived.sensor = handle;
                derived.sensor_type = sensor_type;
                derived.needs_ack = false;
                match batch.push(derived) {
                    Ok(()) => {
                        last_values.record(&derived);
                        appended += 1;
                    }
                    Err(e) => {
                        self.overflow_dropped += 1;
                        warn!(handle = %handle, error = %e, "derived event dropped");
                    }
                }
            }
        }

        if appended > 0 {
            batch.sort_by_timestamp();
        }
        appended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{FusionError, SensorDescriptor, SensorEvent, SensorType};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct CountingFusion {
        seen: Arc<AtomicU64>,
    }

    impl FusionSink for CountingFusion {
        fn process(&mut self, _raw: &SensorEvent) -> Result<(), FusionError> {
            self.seen.fetch_add(1, Ordering::Relaxed);
            Err(FusionError("not calibrated".into()))
        }
    }

    fn registry() -> SensorRegistry {
        let mut reg = SensorRegistry::new();
        reg.register_physical(SensorDescriptor::new(1, "accel", SensorType::Accelerometer))
            .unwrap();
        reg.register_virtual(
            SensorDescriptor::new(10, "gravity", SensorType::Gravity),
            SensorHandle(1),
            Box::new(GravitySensor::new(SensorHandle(10), SensorHandle(1), 0.8)),
        )
        .unwrap();
        reg
    }

    fn accel(ts: i64) -> SensorEvent {
        SensorEvent::sample(SensorHandle(1), SensorType::Accelerometer, ts, &[0.0, 0.0, 9.8])
    }

    #[test]
    fn test_inactive_synthesizer_is_noop() {
        let mut reg = registry();
        let mut synth = VirtualSynthesizer::new();
        let mut lv = LastValueCache::new();
        let mut batch = EventBuffer::with_capacity(4);
        batch.push(accel(1)).unwrap();
        assert_eq!(synth.synthesize(&mut batch, &mut reg, &mut lv), 0);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_derived_events_merged_in_order() {
        let mut reg = registry();
        let mut synth = VirtualSynthesizer::new();
        let mut lv = LastValueCache::new();
        assert!(synth.activate(SensorHandle(10), &mut reg));
        assert!(!synth.activate(SensorHandle(10), &mut reg));

        let mut batch = EventBuffer::with_capacity(8);
        batch.push(accel(30)).unwrap();
        batch.push(accel(10)).unwrap();
        assert_eq!(synth.synthesize(&mut batch, &mut reg, &mut lv), 2);
        assert_eq!(batch.len(), 4);
        assert!(batch.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(
            batch.iter().filter(|e| e.sensor == SensorHandle(10)).count(),
            2
        );
        assert!(lv.latest(SensorHandle(10)).is_some());
    }

    #[test]
    fn test_batch_untouched_when_nothing_derived() {
        let mut reg = registry();
        let mut synth = VirtualSynthesizer::new();
        let mut lv = LastValueCache::new();
        synth.activate(SensorHandle(10), &mut reg);

        // none of these feed the gravity source
        let gyro =
            |ts| SensorEvent::sample(SensorHandle(2), SensorType::Gyroscope, ts, &[0.1, 0.0, 0.0]);
        let mut batch = EventBuffer::with_capacity(8);
        batch.push(gyro(20)).unwrap();
        batch.push(SensorEvent::flush_complete(SensorHandle(1), 5)).unwrap();
        batch.push(gyro(5)).unwrap();
        batch.push(gyro(10)).unwrap();
        let before: Vec<SensorEvent> = batch.iter().copied().collect();

        assert_eq!(synth.synthesize(&mut batch, &mut reg, &mut lv), 0);
        let after: Vec<SensorEvent> = batch.iter().copied().collect();
        assert_eq!(after, before);
    }

    #[test]
    fn test_overflow_drops_derived_events() {
        let mut reg = registry();
        let mut synth = VirtualSynthesizer::new();
        let mut lv = LastValueCache::new();
        synth.activate(SensorHandle(10), &mut reg);

        let mut batch = EventBuffer::with_capacity(3);
        batch.push(accel(1)).unwrap();
        batch.push(accel(2)).unwrap();
        assert_eq!(synth.synthesize(&mut batch, &mut reg, &mut lv), 1);
        assert_eq!(batch.len(), 3);
        assert_eq!(synth.overflow_dropped(), 1);
    }

    #[test]
    fn test_fusion_errors_ignored() {
        let mut reg = registry();
        let seen = Arc::new(AtomicU64::new(0));
        let mut synth = VirtualSynthesizer::new().with_fusion(Box::new(CountingFusion {
            seen: Arc::clone(&seen),
        }));
        let mut lv = LastValueCache::new();
        synth.activate(SensorHandle(10), &mut reg);

        let mut batch = EventBuffer::with_capacity(4);
        batch.push(accel(1)).unwrap();
        assert_eq!(synth.synthesize(&mut batch, &mut reg, &mut lv), 1);
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_deactivate() {
        let mut reg = registry();
        let mut synth = VirtualSynthesizer::new();
        synth.activate(SensorHandle(10), &mut reg);
        assert!(synth.deactivate(SensorHandle(10), &mut reg));
        assert!(!synth.has_active());
        assert!(!synth.deactivate(SensorHandle(10), &mut reg));
    }
}
