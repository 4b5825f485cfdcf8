//! SensorDevice trait - the hardware abstraction
//!
//! The engine drives a single device. `poll` is called from a dedicated
//! blocking thread while control requests arrive from the engine task, so
//! implementations take `&self` and synchronize internally.

use std::time::Duration;

use crate::{DeviceError, EventBuffer, SensorEvent, SensorHandle};

/// Device operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceMode {
    /// Events come from hardware
    #[default]
    Normal,
    /// Events come from [`SensorDevice::inject`]
    DataInjection,
}

/// Sensor device contract
///
/// # Example
///
/// ```ignore
/// let mut buffer = EventBuffer::with_capacity(256);
/// device.batch(handle, Duration::from_millis(20), Duration::ZERO)?;
/// device.activate(handle, true)?;
/// let n = device.poll(&mut buffer, 128)?;
/// ```
pub trait SensorDevice: Send + Sync {
    /// Block until events are available and append at most `max_count` of them.
    ///
    /// Returning `Ok(0)` is allowed (e.g. a timeout) and is not an error.
    fn poll(&self, buffer: &mut EventBuffer, max_count: usize) -> Result<usize, DeviceError>;

    /// Arm or disarm a sensor
    fn activate(&self, handle: SensorHandle, enabled: bool) -> Result<(), DeviceError>;

    /// Set the sampling period only
    fn set_delay(&self, handle: SensorHandle, period: Duration) -> Result<(), DeviceError>;

    /// Set sampling period and maximum batching latency
    fn batch(
        &self,
        handle: SensorHandle,
        period: Duration,
        max_latency: Duration,
    ) -> Result<(), DeviceError>;

    /// Request a flush-complete marker for `handle`.
    ///
    /// [`DeviceError::Unsupported`] means the caller must synthesize the
    /// completion itself.
    fn flush(&self, handle: SensorHandle) -> Result<(), DeviceError>;

    /// Feed a synthetic event back through `poll` (data-injection mode only)
    fn inject(&self, event: SensorEvent) -> Result<(), DeviceError>;

    /// Switch between hardware and injected input
    fn set_mode(&self, mode: DeviceMode) -> Result<(), DeviceError>;
}
