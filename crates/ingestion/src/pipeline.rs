//! Poll loop main entry
//!
//! The single producer of the engine: blocks on the device and forwards each
//! non-empty read as one batch. Runs on a dedicated blocking thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_channel::Sender;
use contracts::{EventBuffer, SensorDevice};
use tracing::{debug, error, info, instrument, trace};

use crate::config::{IngestionMetrics, MetricsSnapshot, PollConfig};
use crate::error::Result;

/// Cloneable stop switch for a running [`PollLoop`]
#[derive(Debug, Clone)]
pub struct PollStopHandle {
    running: Arc<AtomicBool>,
}

impl PollStopHandle {
    /// Ask the loop to exit after the current poll
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// Blocking device poll loop
pub struct PollLoop {
    device: Arc<dyn SensorDevice>,
    config: PollConfig,
    running: Arc<AtomicBool>,
    metrics: Arc<IngestionMetrics>,
}

impl PollLoop {
    /// Create new poll loop
    ///
    /// # Errors
    /// Rejects a poll limit larger than the batch buffer.
    pub fn new(device: Arc<dyn SensorDevice>, config: PollConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            device,
            config,
            running: Arc::new(AtomicBool::new(true)),
            metrics: Arc::new(IngestionMetrics::new()),
        })
    }

    pub fn stop_handle(&self) -> PollStopHandle {
        PollStopHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Get metrics reference
    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run until stopped, the receiver goes away or `max_batches` is reached.
    ///
    /// # Errors
    /// A device read error is fatal and ends the loop.
    #[instrument(
        name = "ingestion_poll_loop",
        skip(self, tx),
        fields(poll_limit = self.config.poll_limit)
    )]
    pub fn run(self, tx: Sender<EventBuffer>) -> Result<MetricsSnapshot> {
        info!(
            buffer_capacity = self.config.buffer_capacity,
            max_batches = ?self.config.max_batches,
            "poll loop started"
        );

        while self.running.load(Ordering::Relaxed) {
            let mut buffer = EventBuffer::with_capacity(self.config.buffer_capacity);
            let count = match self.device.poll(&mut buffer, self.config.poll_limit) {
                Ok(count) => count,
                Err(e) => {
                    self.metrics.record_device_error();
                    metrics::counter!("sensorhub_device_errors_total").increment(1);
                    error!(error = %e, "device poll failed, stopping");
                    self.running.store(false, Ordering::SeqCst);
                    return Err(e.into());
                }
            };
            self.metrics.record_poll(count);
            if count == 0 {
                continue;
            }

            self.metrics.record_batch(count);
            metrics::counter!("sensorhub_device_events_total").increment(count as u64);
            trace!(events = count, "batch polled");

            if tx.send_blocking(buffer).is_err() {
                debug!("batch receiver dropped, stopping");
                break;
            }

            if let Some(max) = self.config.max_batches {
                if self.metrics.snapshot().batches >= max {
                    info!(max_batches = max, "batch limit reached");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        let snapshot = self.metrics.snapshot();
        info!(
            batches = snapshot.batches,
            events = snapshot.events,
            "poll loop stopped"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestionError;
    use crate::mock::{MockSensorConfig, MockSensorDevice};
    use contracts::{DeviceError, SensorDescriptor, SensorEvent, SensorHandle, SensorType};
    use rand::Rng;
    use std::time::Duration;

    fn device() -> Arc<MockSensorDevice> {
        Arc::new(
            MockSensorDevice::new(vec![MockSensorConfig::new(
                SensorDescriptor::new(1, "accel", SensorType::Accelerometer),
                200.0,
            )])
            .with_poll_timeout(Duration::from_millis(20)),
        )
    }

    #[test]
    fn test_rejects_limit_above_capacity() {
        let result = PollLoop::new(device(), PollConfig::new(64, 32));
        assert!(matches!(result, Err(IngestionError::InvalidConfig { .. })));
    }

    #[test]
    fn test_forwards_batches_within_limit() {
        let device = device();
        let mut rng = rand::rng();
        let total = rng.random_range(10..40);
        for ts in 0..total {
            device.push(SensorEvent::sample(
                SensorHandle(1),
                SensorType::Accelerometer,
                ts,
                &[0.0],
            ));
        }

        let poll = PollLoop::new(device.clone(), PollConfig::new(8, 16)).unwrap();
        let stop = poll.stop_handle();
        let (tx, rx) = async_channel::bounded(64);
        let worker = std::thread::spawn(move || poll.run(tx));

        let mut received = 0;
        while received < total as usize {
            let batch = rx.recv_blocking().unwrap();
            assert!(batch.len() <= 8);
            received += batch.len();
        }
        stop.stop();
        let snapshot = worker.join().unwrap().unwrap();
        assert_eq!(snapshot.events, total as u64);
        assert!(!stop.is_running());
    }

    #[test]
    fn test_device_error_is_fatal() {
        let device = device();
        device.fail_next_poll(DeviceError::Disconnected);
        let poll = PollLoop::new(device, PollConfig::new(8, 16)).unwrap();
        let metrics = poll.metrics();
        let (tx, _rx) = async_channel::bounded(4);
        let err = poll.run(tx).unwrap_err();
        assert!(matches!(err, IngestionError::Device(DeviceError::Disconnected)));
        assert_eq!(metrics.snapshot().device_errors, 1);
    }

    #[test]
    fn test_max_batches_stops_loop() {
        let device = device();
        for ts in 0..5 {
            device.push(SensorEvent::sample(
                SensorHandle(1),
                SensorType::Accelerometer,
                ts,
                &[0.0],
            ));
        }
        let poll =
            PollLoop::new(device, PollConfig::new(1, 4).with_max_batches(Some(3))).unwrap();
        let (tx, rx) = async_channel::bounded(8);
        let snapshot = poll.run(tx).unwrap();
        assert_eq!(snapshot.batches, 3);
        assert_eq!(rx.len(), 3);
    }
}
