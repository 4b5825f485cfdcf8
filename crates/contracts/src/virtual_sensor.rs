//! Virtual sensor contracts

use crate::{FusionError, SensorEvent};

/// A sensor whose events are derived from raw device events.
///
/// The math is a black box to the engine; it only sees raw events go in and
/// optional derived events come out.
pub trait VirtualSensor: Send {
    /// Derive at most one event from a raw event
    fn process(&mut self, raw: &SensorEvent) -> Option<SensorEvent>;

    /// Called when the sensor gains its first or loses its last subscriber
    fn set_active(&mut self, _active: bool) {}
}

/// Best-effort consumer of every raw event while any virtual sensor is active
pub trait FusionSink: Send {
    fn process(&mut self, raw: &SensorEvent) -> Result<(), FusionError>;
}
