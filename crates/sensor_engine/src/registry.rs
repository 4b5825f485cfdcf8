//! Sensor registry
//!
//! Arena of every sensor known to the engine. Descriptors live in a `Vec`
//! and are addressed through a handle index, so lookups never hold pointers
//! into the arena. Virtual sensors are owned here as trait objects.

use std::collections::HashMap;
use std::fmt;

use contracts::{ClientIdentity, EngineError, SensorDescriptor, SensorHandle, VirtualSensor};

/// One arena slot
pub struct SensorEntry {
    descriptor: SensorDescriptor,
    /// Physical sensor a virtual sensor is computed from
    source: Option<SensorHandle>,
    virtual_impl: Option<Box<dyn VirtualSensor>>,
}

impl SensorEntry {
    #[inline]
    pub fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    #[inline]
    pub fn source(&self) -> Option<SensorHandle> {
        self.source
    }

    /// Mutable access to the virtual sensor implementation, if any
    #[inline]
    pub fn virtual_impl_mut(&mut self) -> Option<&mut (dyn VirtualSensor + 'static)> {
        self.virtual_impl.as_deref_mut()
    }
}

impl fmt::Debug for SensorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorEntry")
            .field("handle", &self.descriptor.handle)
            .field("name", &self.descriptor.name)
            .field("is_virtual", &self.descriptor.is_virtual)
            .finish()
    }
}

/// Immutable-after-init sensor catalog
#[derive(Debug, Default)]
pub struct SensorRegistry {
    entries: Vec<SensorEntry>,
    index: HashMap<SensorHandle, usize>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a physical sensor
    ///
    /// # Errors
    /// Duplicate handles are rejected.
    pub fn register_physical(&mut self, descriptor: SensorDescriptor) -> Result<(), EngineError> {
        self.insert(descriptor, None, None)
    }

    /// Register a virtual sensor computed from the physical sensor `source`
    ///
    /// # Errors
    /// Duplicate handles and unknown or virtual sources are rejected.
    pub fn register_virtual(
        &mut self,
        mut descriptor: SensorDescriptor,
        source: SensorHandle,
        implementation: Box<dyn VirtualSensor>,
    ) -> Result<(), EngineError> {
        match self.descriptor(source) {
            Some(d) if !d.is_virtual => {}
            _ => {
                return Err(EngineError::invalid_argument(format!(
                    "virtual sensor {} has no physical source {source}",
                    descriptor.handle
                )))
            }
        }
        descriptor.is_virtual = true;
        self.insert(descriptor, Some(source), Some(implementation))
    }

    fn insert(
        &mut self,
        descriptor: SensorDescriptor,
        source: Option<SensorHandle>,
        virtual_impl: Option<Box<dyn VirtualSensor>>,
    ) -> Result<(), EngineError> {
        let handle = descriptor.handle;
        if self.index.contains_key(&handle) {
            return Err(EngineError::invalid_argument(format!(
                "duplicate sensor handle {handle}"
            )));
        }
        self.index.insert(handle, self.entries.len());
        self.entries.push(SensorEntry {
            descriptor,
            source,
            virtual_impl,
        });
        Ok(())
    }

    #[inline]
    pub fn get(&self, handle: SensorHandle) -> Option<&SensorEntry> {
        self.index.get(&handle).map(|&i| &self.entries[i])
    }

    #[inline]
    pub fn get_mut(&mut self, handle: SensorHandle) -> Option<&mut SensorEntry> {
        self.index.get(&handle).map(|&i| &mut self.entries[i])
    }

    #[inline]
    pub fn descriptor(&self, handle: SensorHandle) -> Option<&SensorDescriptor> {
        self.get(handle).map(SensorEntry::descriptor)
    }

    /// Descriptor lookup that maps a miss to `InvalidHandle`
    pub fn require(&self, handle: SensorHandle) -> Result<&SensorDescriptor, EngineError> {
        self.descriptor(handle)
            .ok_or(EngineError::InvalidHandle { handle })
    }

    /// Physical handle the device must run for `handle`
    pub fn device_handle(&self, handle: SensorHandle) -> Option<SensorHandle> {
        self.get(handle).map(|e| e.source.unwrap_or(handle))
    }

    /// Virtual sensors computed from `source`
    pub fn virtuals_of(&self, source: SensorHandle) -> impl Iterator<Item = SensorHandle> + '_ {
        self.entries
            .iter()
            .filter(move |e| e.source == Some(source))
            .map(|e| e.descriptor.handle)
    }

    pub fn is_wake_up(&self, handle: SensorHandle) -> bool {
        self.descriptor(handle).is_some_and(|d| d.wake_up)
    }

    /// Number of registered virtual sensors
    pub fn virtual_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.descriptor.is_virtual)
            .count()
    }

    /// Whether any sensor has a hardware FIFO
    pub fn batching_supported(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.descriptor.fifo_max_events > 0)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &SensorDescriptor> {
        self.entries.iter().map(SensorEntry::descriptor)
    }

    /// Descriptors the identity is allowed to see
    pub fn visible_to(&self, identity: &ClientIdentity) -> Vec<SensorDescriptor> {
        self.descriptors()
            .filter(|d| identity.can_access(d.required_permission.as_deref()))
            .cloned()
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{SensorEvent, SensorType};

    struct Passthrough;

    impl VirtualSensor for Passthrough {
        fn process(&mut self, raw: &SensorEvent) -> Option<SensorEvent> {
            Some(*raw)
        }
    }

    fn registry() -> SensorRegistry {
        let mut reg = SensorRegistry::new();
        reg.register_physical(
            SensorDescriptor::new(1, "accel", SensorType::Accelerometer).with_fifo(0, 300),
        )
        .unwrap();
        reg.register_physical(
            SensorDescriptor::new(2, "heart", SensorType::HeartRate)
                .with_permission("BODY_SENSORS"),
        )
        .unwrap();
        reg.register_virtual(
            SensorDescriptor::new(10, "gravity", SensorType::Gravity),
            SensorHandle(1),
            Box::new(Passthrough),
        )
        .unwrap();
        reg
    }

    #[test]
    fn test_lookup_by_handle() {
        let reg = registry();
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.descriptor(SensorHandle(2)).unwrap().name, "heart");
        assert!(reg.descriptor(SensorHandle(99)).is_none());
        assert_eq!(
            reg.require(SensorHandle(99)),
            Err(EngineError::InvalidHandle {
                handle: SensorHandle(99)
            })
        );
    }

    #[test]
    fn test_duplicate_handle_rejected() {
        let mut reg = registry();
        let err = reg
            .register_physical(SensorDescriptor::new(1, "dup", SensorType::Light))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument { .. }));
    }

    #[test]
    fn test_virtual_registration() {
        let mut reg = registry();
        assert_eq!(reg.virtual_count(), 1);
        assert!(reg.descriptor(SensorHandle(10)).unwrap().is_virtual);
        assert!(reg
            .get_mut(SensorHandle(10))
            .unwrap()
            .virtual_impl_mut()
            .is_some());
        assert!(reg.batching_supported());
    }

    #[test]
    fn test_virtual_source_resolution() {
        let mut reg = registry();
        assert_eq!(reg.device_handle(SensorHandle(10)), Some(SensorHandle(1)));
        assert_eq!(reg.device_handle(SensorHandle(2)), Some(SensorHandle(2)));
        assert_eq!(
            reg.virtuals_of(SensorHandle(1)).collect::<Vec<_>>(),
            vec![SensorHandle(10)]
        );

        let err = reg
            .register_virtual(
                SensorDescriptor::new(11, "orphan", SensorType::Gravity),
                SensorHandle(42),
                Box::new(Passthrough),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument { .. }));
    }

    #[test]
    fn test_visible_to_filters_by_permission() {
        let reg = registry();
        let plain = ClientIdentity::new("com.plain", 1);
        let granted = ClientIdentity::new("com.granted", 2).with_permission("BODY_SENSORS");
        assert_eq!(reg.visible_to(&plain).len(), 2);
        assert_eq!(reg.visible_to(&granted).len(), 3);
    }
}
