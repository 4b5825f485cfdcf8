//! EngineBlueprint - Config Loader output
//!
//! Describes a complete engine setup: runtime tunables, physical sensors,
//! virtual sensors, and the demo clients the CLI attaches.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::{
    ClientIdentity, ReportingMode, SensorDescriptor, SensorHandle, SensorType, EVENT_WIRE_SIZE,
};

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete engine blueprint
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EngineBlueprint {
    /// Config version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Runtime tunables
    #[serde(default)]
    #[validate(nested)]
    pub engine: EngineSettings,

    /// Physical sensors exposed by the device
    #[validate(length(min = 1, message = "at least one sensor is required"), nested)]
    pub sensors: Vec<SensorConfig>,

    /// Virtual sensors derived from physical ones
    #[serde(default)]
    #[validate(nested)]
    pub virtual_sensors: Vec<VirtualSensorConfig>,

    /// Demo clients attached by `sensorhub run`
    #[serde(default)]
    #[validate(nested)]
    pub clients: Vec<ClientConfig>,
}

impl EngineBlueprint {
    /// Descriptors for every physical sensor
    pub fn physical_descriptors(&self) -> Vec<SensorDescriptor> {
        self.sensors.iter().map(SensorConfig::to_descriptor).collect()
    }

    /// Whether any sensor has a hardware FIFO
    pub fn batching_supported(&self) -> bool {
        self.sensors.iter().any(|s| s.fifo_max_events > 0)
    }
}

/// Engine runtime tunables
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EngineSettings {
    /// Capacity of the poll buffer, shared between raw and virtual events
    #[serde(default = "default_receive_buffer_events")]
    #[validate(range(min = 2, message = "receive_buffer_events must be >= 2"))]
    pub receive_buffer_events: usize,

    /// Client socket buffer when no sensor batches
    #[serde(default = "default_socket_buffer_bytes")]
    #[validate(range(min = 208, message = "socket buffer must hold two events"))]
    pub socket_buffer_bytes: usize,

    /// Client socket buffer when any sensor batches
    #[serde(default = "default_batched_socket_buffer_bytes")]
    #[validate(range(min = 208, message = "socket buffer must hold two events"))]
    pub batched_socket_buffer_bytes: usize,

    /// Wake-lock watchdog period
    #[serde(default = "default_watchdog_interval_ms")]
    #[validate(range(min = 1))]
    pub watchdog_interval_ms: u64,

    /// Engine command queue depth
    #[serde(default = "default_command_queue_capacity")]
    #[validate(range(min = 1))]
    pub command_queue_capacity: usize,

    /// Per-client transport depth, in writes
    #[serde(default = "default_client_queue_capacity")]
    #[validate(range(min = 1))]
    pub client_queue_capacity: usize,

    /// Name passed to the wake-lock primitive
    #[serde(default = "default_wake_lock_name")]
    #[validate(length(min = 1))]
    pub wake_lock_name: String,
}

fn default_receive_buffer_events() -> usize {
    256
}

fn default_socket_buffer_bytes() -> usize {
    4 * 1024
}

fn default_batched_socket_buffer_bytes() -> usize {
    100 * 1024
}

fn default_watchdog_interval_ms() -> u64 {
    5000
}

fn default_command_queue_capacity() -> usize {
    256
}

fn default_client_queue_capacity() -> usize {
    16
}

fn default_wake_lock_name() -> String {
    "sensorhub_wakelock".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            receive_buffer_events: default_receive_buffer_events(),
            socket_buffer_bytes: default_socket_buffer_bytes(),
            batched_socket_buffer_bytes: default_batched_socket_buffer_bytes(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            command_queue_capacity: default_command_queue_capacity(),
            client_queue_capacity: default_client_queue_capacity(),
            wake_lock_name: default_wake_lock_name(),
        }
    }
}

impl EngineSettings {
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    /// Socket buffer size in bytes, depending on whether batching is in use
    pub fn socket_buffer_for(&self, batching: bool) -> usize {
        if batching {
            self.batched_socket_buffer_bytes
        } else {
            self.socket_buffer_bytes
        }
    }

    /// Largest chunk written from a connection cache in one go
    pub fn drain_chunk_events(&self, batching: bool) -> usize {
        let by_receiver = self.receive_buffer_events / 2;
        let by_socket = self.socket_buffer_for(batching) / (EVENT_WIRE_SIZE * 2);
        by_receiver.min(by_socket).max(1)
    }

    /// Cache size used when no subscribed sensor declares a FIFO
    pub fn fallback_cache_events(&self) -> usize {
        (self.batched_socket_buffer_bytes / EVENT_WIRE_SIZE).max(1)
    }
}

/// Physical sensor definition
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SensorConfig {
    /// Unique handle
    pub handle: i32,

    /// Display name
    #[validate(length(min = 1, message = "sensor name cannot be empty"))]
    pub name: String,

    /// Sensor type
    pub sensor_type: SensorType,

    /// Overrides the type's default reporting mode
    #[serde(default)]
    pub reporting_mode: Option<ReportingMode>,

    #[serde(default)]
    pub wake_up: bool,

    #[serde(default)]
    pub fifo_reserved_events: u32,

    #[serde(default)]
    pub fifo_max_events: u32,

    /// Fastest sampling period in microseconds
    #[serde(default)]
    pub min_delay_us: u64,

    #[serde(default)]
    pub required_permission: Option<String>,

    /// Native rate of the mock device generator (Hz), must be > 0
    #[serde(default = "default_rate_hz")]
    #[validate(range(exclusive_min = 0.0, message = "rate_hz must be > 0"))]
    pub rate_hz: f64,
}

fn default_rate_hz() -> f64 {
    50.0
}

impl SensorConfig {
    pub fn to_descriptor(&self) -> SensorDescriptor {
        let mut desc = SensorDescriptor::new(self.handle, self.name.clone(), self.sensor_type)
            .with_wake_up(self.wake_up)
            .with_fifo(self.fifo_reserved_events, self.fifo_max_events)
            .with_min_delay(Duration::from_micros(self.min_delay_us));
        if let Some(mode) = self.reporting_mode {
            desc = desc.with_reporting_mode(mode);
        }
        if let Some(ref permission) = self.required_permission {
            desc = desc.with_permission(permission.clone());
        }
        desc
    }
}

/// Built-in virtual sensor kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VirtualSensorKind {
    /// Low-passed accelerometer
    Gravity,
    /// Accelerometer minus gravity
    LinearAcceleration,
}

impl VirtualSensorKind {
    pub fn sensor_type(self) -> SensorType {
        match self {
            Self::Gravity => SensorType::Gravity,
            Self::LinearAcceleration => SensorType::LinearAcceleration,
        }
    }
}

/// Virtual sensor definition
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VirtualSensorConfig {
    pub handle: i32,

    #[validate(length(min = 1, message = "sensor name cannot be empty"))]
    pub name: String,

    pub kind: VirtualSensorKind,

    /// Accelerometer handle the sensor derives from
    pub source: i32,

    #[serde(default)]
    pub wake_up: bool,

    #[serde(default)]
    pub min_delay_us: u64,

    #[serde(default)]
    pub required_permission: Option<String>,

    /// Low-pass filter coefficient in (0, 1)
    #[serde(default = "default_filter_alpha")]
    #[validate(range(exclusive_min = 0.0, exclusive_max = 1.0))]
    pub filter_alpha: f32,
}

fn default_filter_alpha() -> f32 {
    0.8
}

impl VirtualSensorConfig {
    pub fn to_descriptor(&self) -> SensorDescriptor {
        let mut desc =
            SensorDescriptor::new(self.handle, self.name.clone(), self.kind.sensor_type())
                .with_wake_up(self.wake_up)
                .with_min_delay(Duration::from_micros(self.min_delay_us))
                .as_virtual();
        if let Some(ref permission) = self.required_permission {
            desc = desc.with_permission(permission.clone());
        }
        desc
    }

    pub fn source_handle(&self) -> SensorHandle {
        SensorHandle(self.source)
    }
}

/// Demo client attached by the CLI
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ClientConfig {
    #[validate(length(min = 1, message = "package cannot be empty"))]
    pub package: String,

    #[serde(default = "default_uid")]
    pub uid: u32,

    #[serde(default)]
    pub permissions: Vec<String>,

    #[serde(default)]
    #[validate(nested)]
    pub subscriptions: Vec<SubscriptionConfig>,

    /// Acknowledge wake-up events as they arrive
    #[serde(default = "default_true")]
    pub ack: bool,

    /// Artificial delay between reads, to exercise backpressure
    #[serde(default)]
    pub read_delay_ms: u64,

    /// Issue a flush right after subscribing
    #[serde(default)]
    pub flush_on_start: bool,
}

fn default_uid() -> u32 {
    10000
}

fn default_true() -> bool {
    true
}

impl ClientConfig {
    pub fn identity(&self) -> ClientIdentity {
        let mut identity = ClientIdentity::new(self.package.clone(), self.uid);
        identity.permissions.extend(self.permissions.iter().cloned());
        identity
    }
}

/// One subscription of a demo client
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubscriptionConfig {
    pub handle: i32,

    /// Requested sampling period
    #[validate(range(min = 1, message = "period_ms must be >= 1"))]
    pub period_ms: u64,

    #[serde(default)]
    pub max_latency_ms: u64,
}

impl SubscriptionConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_millis(self.max_latency_ms)
    }
}
