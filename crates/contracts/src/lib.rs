//! # Contracts
//!
//! Frozen interface contracts (ICD), defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Event timestamps are device-clock nanoseconds (`i64`)
//! - Periods and latencies are `std::time::Duration`

mod blueprint;
mod client;
mod device;
mod error;
mod event;
mod handle;
mod report;
mod sensor;
mod transport;
mod virtual_sensor;

pub use blueprint::*;
pub use client::*;
pub use device::{DeviceMode, SensorDevice};
pub use error::*;
pub use event::*;
pub use handle::{ConnectionId, SensorHandle};
pub use report::BatchReport;
pub use sensor::*;
pub use transport::{EventTransport, WakeLockPrimitive, WritableFuture};
pub use virtual_sensor::{FusionSink, VirtualSensor};
