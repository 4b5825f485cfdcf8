//! Accelerometer-derived virtual sensors

use contracts::{
    SensorEvent, SensorHandle, SensorType, VirtualSensor, VirtualSensorConfig, VirtualSensorKind,
};
use nalgebra::Vector3;

/// Exponential low-pass filter over 3-axis samples
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    alpha: f32,
    state: Option<Vector3<f32>>,
}

impl LowPassFilter {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, state: None }
    }

    /// Feed a sample and return the filtered value
    pub fn update(&mut self, sample: Vector3<f32>) -> Vector3<f32> {
        let next = match self.state {
            Some(prev) => prev * self.alpha + sample * (1.0 - self.alpha),
            None => sample,
        };
        self.state = Some(next);
        next
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}

fn accel_vector(raw: &SensorEvent) -> Option<Vector3<f32>> {
    if raw.sensor_type != SensorType::Accelerometer {
        return None;
    }
    match raw.values() {
        [x, y, z, ..] => Some(Vector3::new(*x, *y, *z)),
        _ => None,
    }
}

/// Gravity: low-passed accelerometer
#[derive(Debug, Clone)]
pub struct GravitySensor {
    handle: SensorHandle,
    source: SensorHandle,
    filter: LowPassFilter,
}

impl GravitySensor {
    pub fn new(handle: SensorHandle, source: SensorHandle, alpha: f32) -> Self {
        Self {
            handle,
            source,
            filter: LowPassFilter::new(alpha),
        }
    }
}

impl VirtualSensor for GravitySensor {
    fn process(&mut self, raw: &SensorEvent) -> Option<SensorEvent> {
        if raw.sensor != self.source {
            return None;
        }
        let gravity = self.filter.update(accel_vector(raw)?);
        Some(SensorEvent::sample(
            self.handle,
            SensorType::Gravity,
            raw.timestamp,
            gravity.as_slice(),
        ))
    }

    fn set_active(&mut self, active: bool) {
        if !active {
            self.filter.reset();
        }
    }
}

/// Linear acceleration: accelerometer minus estimated gravity
#[derive(Debug, Clone)]
pub struct LinearAccelerationSensor {
    handle: SensorHandle,
    source: SensorHandle,
    filter: LowPassFilter,
}

impl LinearAccelerationSensor {
    pub fn new(handle: SensorHandle, source: SensorHandle, alpha: f32) -> Self {
        Self {
            handle,
            source,
            filter: LowPassFilter::new(alpha),
        }
    }
}

impl VirtualSensor for LinearAccelerationSensor {
    fn process(&mut self, raw: &SensorEvent) -> Option<SensorEvent> {
        if raw.sensor != self.source {
            return None;
        }
        let accel = accel_vector(raw)?;
        let linear = accel - self.filter.update(accel);
        Some(SensorEvent::sample(
            self.handle,
            SensorType::LinearAcceleration,
            raw.timestamp,
            linear.as_slice(),
        ))
    }

    fn set_active(&mut self, active: bool) {
        if !active {
            self.filter.reset();
        }
    }
}

/// Build the implementation for a configured virtual sensor
pub fn build_virtual_sensor(config: &VirtualSensorConfig) -> Box<dyn VirtualSensor> {
    let handle = SensorHandle(config.handle);
    let source = config.source_handle();
    match config.kind {
        VirtualSensorKind::Gravity => {
            Box::new(GravitySensor::new(handle, source, config.filter_alpha))
        }
        VirtualSensorKind::LinearAcceleration => Box::new(LinearAccelerationSensor::new(
            handle,
            source,
            config.filter_alpha,
        )),
    }
}
