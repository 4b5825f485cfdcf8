//! Pipeline orchestrator - coordinates all components.
//!
//! Builds the simulated device and the engine from the blueprint, starts the
//! runtime, attaches one task per configured demo client and waits for the
//! run to end (batch limit, timeout, signal or device failure).

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{ClientConfig, ConnectionMode, EngineBlueprint, SensorHandle};
use dispatcher::{EngineHandle, EngineRuntime, RuntimeOptions};
use ingestion::MockSensorDevice;
use sensor_engine::{SensorEngine, TracingWakeLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{ClientStats, PipelineStats};
use crate::error::CliError;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The engine blueprint
    pub blueprint: EngineBlueprint,

    /// Maximum number of polled batches (None = unlimited)
    pub max_batches: Option<u64>,

    /// Run timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Batches buffered between poll loop and engine
    pub batch_buffer: usize,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until the engine stops on its own, the timeout elapses or
    /// `shutdown` resolves.
    ///
    /// # Errors
    /// A device failure stops the engine and is returned here.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let device = Arc::new(MockSensorDevice::from_blueprint(blueprint));
        let engine = SensorEngine::from_blueprint(blueprint, device, Box::new(TracingWakeLock))
            .context("Failed to build sensor engine")?;

        let runtime = EngineRuntime::spawn(
            engine,
            RuntimeOptions {
                max_batches: self.config.max_batches,
                batch_channel_capacity: self.config.batch_buffer,
            },
        )
        .context("Failed to start engine runtime")?;
        let handle = runtime.handle();

        info!(
            sensors = blueprint.sensors.len(),
            virtual_sensors = blueprint.virtual_sensors.len(),
            clients = blueprint.clients.len(),
            max_batches = ?self.config.max_batches,
            "Engine running"
        );

        let mut clients = JoinSet::new();
        for config in blueprint.clients.clone() {
            clients.spawn(run_client(handle.clone(), config));
        }

        let timeout = async {
            match self.config.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        let wait = runtime.wait();
        tokio::pin!(wait);
        let report = tokio::select! {
            report = &mut wait => report,
            _ = timeout => {
                warn!("Run timed out, stopping engine");
                request_shutdown(&handle).await;
                wait.await
            }
            _ = shutdown => {
                warn!("Received shutdown signal, stopping engine...");
                request_shutdown(&handle).await;
                wait.await
            }
        };
        drop(handle);

        // Connections are closed by the runtime on exit, so client tasks finish
        let mut client_stats = Vec::new();
        while let Some(joined) = clients.join_next().await {
            match joined {
                Ok(Ok(stats)) => client_stats.push(stats),
                Ok(Err(e)) => warn!(error = %e, "Demo client failed"),
                Err(e) => warn!(error = %e, "Demo client task aborted"),
            }
        }

        let report = report.map_err(CliError::from)?;
        let stats = PipelineStats {
            duration: start_time.elapsed(),
            report,
            clients: client_stats,
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            batches = stats.report.runtime.batches,
            delivered = stats.report.runtime.events_delivered,
            "Pipeline shutdown complete"
        );
        Ok(stats)
    }
}

async fn request_shutdown(handle: &EngineHandle) {
    if let Err(e) = handle.shutdown().await {
        debug!(error = %e, "engine already stopped");
    }
}

/// One demo client: subscribe, optionally flush, then read until the
/// connection closes.
async fn run_client(handle: EngineHandle, config: ClientConfig) -> Result<ClientStats, CliError> {
    let package = config.package.clone();
    let mut queue = handle
        .create_connection(config.identity(), ConnectionMode::Normal)
        .await
        .map_err(|e| CliError::client(&package, e))?;
    drop(handle);

    let mut stats = ClientStats {
        package: package.clone(),
        ..Default::default()
    };

    for sub in &config.subscriptions {
        let sensor = SensorHandle(sub.handle);
        match queue.enable(sensor, sub.period(), sub.max_latency()).await {
            Ok(()) => stats.subscribed += 1,
            Err(e) => {
                warn!(package = %package, handle = %sensor, error = %e, "Subscription rejected");
                stats.rejected += 1;
            }
        }
    }

    if config.flush_on_start {
        if let Err(e) = queue.flush().await {
            warn!(package = %package, error = %e, "Flush rejected");
        }
    }

    let read_delay = Duration::from_millis(config.read_delay_ms);
    while let Some(events) = queue.recv().await {
        stats.chunks += 1;
        let mut wake_up = 0u32;
        for event in &events {
            if event.is_flush_complete() {
                stats.flush_completions += 1;
                continue;
            }
            stats.events += 1;
            *stats.per_sensor.entry(event.sensor).or_default() += 1;
            if event.needs_ack {
                wake_up += 1;
            }
        }
        stats.wake_up_events += wake_up as u64;

        if config.ack && wake_up > 0 && queue.ack(wake_up).await.is_err() {
            break;
        }
        if !read_delay.is_zero() {
            tokio::time::sleep(read_delay).await;
        }
    }

    debug!(package = %package, events = stats.events, "Demo client finished");
    Ok(stats)
}
