//! # Sensor Engine
//!
//! 传感器事件分发引擎核心（同步状态机）。
//!
//! 负责：
//! - 订阅管理与采样率聚合
//! - 虚拟传感器合成
//! - flush 归属与按连接过滤
//! - 背压缓存与唤醒锁仲裁
//! - 运行模式（normal / restricted / data_injection）
//!
//! ## 使用示例
//!
//! ```ignore
//! use sensor_engine::SensorEngine;
//!
//! let mut engine = SensorEngine::from_blueprint(&blueprint, device, Box::new(TracingWakeLock))?;
//! let id = engine.create_connection(identity, ConnectionMode::Normal, transport)?;
//! engine.enable(id, handle, Duration::from_millis(20), Duration::ZERO)?;
//!
//! let mut buffer = engine.new_poll_buffer();
//! device.poll(&mut buffer, engine.poll_limit())?;
//! let report = engine.process_batch(&mut buffer);
//! ```

mod active;
mod connection;
mod engine;
mod last_value;
mod mode;
mod registrations;
mod registry;
mod synthesis;
mod wake_lock;

#[cfg(test)]
mod test_support;

pub use active::{ActiveSensorRecord, ActiveSensors, RateRequest};
pub use connection::{ClientConnection, ConnectionStats, FlushInfo};
pub use engine::{ActiveSensorStatus, ConnectionStatus, EngineStatus, SensorEngine};
pub use last_value::LastValueCache;
pub use registrations::{RegistrationRecord, REGISTRATION_LOG_SIZE};
pub use registry::SensorRegistry;
pub use synthesis::{build_virtual_sensor, GravitySensor, LinearAccelerationSensor};
pub use wake_lock::{TracingWakeLock, WatchdogVerdict};

// Re-export contracts types
pub use contracts::{BatchReport, EngineBlueprint, EngineError, EngineSettings, SensorEvent};
