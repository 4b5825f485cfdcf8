//! # Ingestion
//!
//! Sensor device ingestion module.
//!
//! Responsibilities:
//! - `MockSensorDevice`: a `SensorDevice` that generates samples at the
//!   configured rates, honours batching latency, flush and data injection
//! - `PollLoop`: the blocking single producer that reads the device and
//!   forwards batches via async-channel
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{MockSensorDevice, PollConfig, PollLoop};
//!
//! let device = Arc::new(MockSensorDevice::from_blueprint(&blueprint));
//! let poll = PollLoop::new(device, PollConfig::new(engine.poll_limit(), 256))?;
//! let (tx, rx) = async_channel::bounded(4);
//! let worker = tokio::task::spawn_blocking(move || poll.run(tx));
//! while let Ok(mut batch) = rx.recv().await {
//!     engine.process_batch(&mut batch);
//! }
//! ```

mod config;
mod error;
mod mock;
mod pipeline;

// Re-exports
pub use config::{IngestionMetrics, MetricsSnapshot, PollConfig};
pub use error::{IngestionError, Result};
pub use mock::{MockSensorConfig, MockSensorDevice};
pub use pipeline::{PollLoop, PollStopHandle};
