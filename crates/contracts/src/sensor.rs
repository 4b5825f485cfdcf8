//! SensorDescriptor - registry entries
//!
//! Static description of one sensor: capabilities, reporting mode, FIFO depth
//! and required permission.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::SensorHandle;

/// Sensor type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Accelerometer,
    MagneticField,
    Gyroscope,
    Light,
    Pressure,
    Proximity,
    Gravity,
    LinearAcceleration,
    RotationVector,
    StepDetector,
    StepCounter,
    SignificantMotion,
    HeartRate,
    /// Flush-complete marker; never registered as a sensor
    MetaData,
}

impl SensorType {
    /// Reporting mode a sensor of this type uses unless configured otherwise
    pub fn default_reporting_mode(self) -> ReportingMode {
        match self {
            Self::Light | Self::Proximity | Self::StepCounter | Self::HeartRate => {
                ReportingMode::OnChange
            }
            Self::SignificantMotion => ReportingMode::OneShot,
            Self::StepDetector | Self::MetaData => ReportingMode::SpecialTrigger,
            _ => ReportingMode::Continuous,
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accelerometer => "accelerometer",
            Self::MagneticField => "magnetic_field",
            Self::Gyroscope => "gyroscope",
            Self::Light => "light",
            Self::Pressure => "pressure",
            Self::Proximity => "proximity",
            Self::Gravity => "gravity",
            Self::LinearAcceleration => "linear_acceleration",
            Self::RotationVector => "rotation_vector",
            Self::StepDetector => "step_detector",
            Self::StepCounter => "step_counter",
            Self::SignificantMotion => "significant_motion",
            Self::HeartRate => "heart_rate",
            Self::MetaData => "meta_data",
        };
        f.write_str(name)
    }
}

/// How a sensor produces events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingMode {
    /// Events at a steady rate
    Continuous,
    /// Events only when the value changes
    OnChange,
    /// A single event, after which the device disarms the sensor
    OneShot,
    /// Sensor-specific trigger
    SpecialTrigger,
}

/// Immutable description of one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub handle: SensorHandle,
    pub name: String,
    pub sensor_type: SensorType,
    pub reporting_mode: ReportingMode,
    /// Events must keep the host awake until acknowledged
    pub wake_up: bool,
    /// FIFO slots reserved for this sensor alone
    pub fifo_reserved_events: u32,
    /// FIFO slots this sensor may use, shared or not
    pub fifo_max_events: u32,
    /// Fastest supported sampling period
    pub min_delay: Duration,
    /// Permission a client must hold to see or enable the sensor
    pub required_permission: Option<String>,
    pub is_virtual: bool,
}

impl SensorDescriptor {
    /// Create a descriptor with the type's default reporting mode and no FIFO
    pub fn new(
        handle: impl Into<SensorHandle>,
        name: impl Into<String>,
        sensor_type: SensorType,
    ) -> Self {
        Self {
            handle: handle.into(),
            name: name.into(),
            sensor_type,
            reporting_mode: sensor_type.default_reporting_mode(),
            wake_up: false,
            fifo_reserved_events: 0,
            fifo_max_events: 0,
            min_delay: Duration::ZERO,
            required_permission: None,
            is_virtual: false,
        }
    }

    pub fn with_reporting_mode(mut self, mode: ReportingMode) -> Self {
        self.reporting_mode = mode;
        self
    }

    pub fn with_wake_up(mut self, wake_up: bool) -> Self {
        self.wake_up = wake_up;
        self
    }

    pub fn with_fifo(mut self, reserved: u32, max: u32) -> Self {
        self.fifo_reserved_events = reserved;
        self.fifo_max_events = max;
        self
    }

    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.required_permission = Some(permission.into());
        self
    }

    pub fn as_virtual(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    #[inline]
    pub fn is_one_shot(&self) -> bool {
        self.reporting_mode == ReportingMode::OneShot
    }

    #[inline]
    pub fn is_on_change(&self) -> bool {
        self.reporting_mode == ReportingMode::OnChange
    }

    /// Whether this sensor owns its FIFO slots outright
    #[inline]
    pub fn has_reserved_fifo(&self) -> bool {
        self.fifo_reserved_events == self.fifo_max_events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reporting_modes() {
        assert_eq!(
            SensorType::Accelerometer.default_reporting_mode(),
            ReportingMode::Continuous
        );
        assert_eq!(SensorType::Light.default_reporting_mode(), ReportingMode::OnChange);
        assert_eq!(
            SensorType::SignificantMotion.default_reporting_mode(),
            ReportingMode::OneShot
        );
    }

    #[test]
    fn test_descriptor_builder() {
        let desc = SensorDescriptor::new(1, "accel", SensorType::Accelerometer)
            .with_wake_up(true)
            .with_fifo(100, 100)
            .with_permission("android.permission.BODY_SENSORS");

        assert!(desc.wake_up);
        assert!(desc.has_reserved_fifo());
        assert!(!desc.is_one_shot());
        assert_eq!(
            desc.required_permission.as_deref(),
            Some("android.permission.BODY_SENSORS")
        );
    }

    #[test]
    fn test_sensor_type_serde() {
        let json = serde_json::to_string(&SensorType::LinearAcceleration).unwrap();
        assert_eq!(json, "\"linear_acceleration\"");
    }
}
