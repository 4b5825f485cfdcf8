//! EngineRuntime - runs a `SensorEngine` as an actor
//!
//! Three kinds of tasks cooperate:
//! - the poll loop on a blocking thread, producing batches
//! - the engine task, the only owner of the engine, serialising commands and
//!   batches
//! - small IO tasks per connection (reader, writable waiter) plus the
//!   wake-lock watchdog, all talking back through the command queue

use std::sync::Arc;
use std::time::Duration;

use contracts::{ClientIdentity, ConnectionId, ConnectionMode, EngineError, EventBuffer};
use ingestion::{IngestionMetrics, PollConfig, PollLoop, PollStopHandle};
use observability::{DispatchMetricsAggregator, MetricsSummary};
use sensor_engine::{EngineStatus, SensorEngine, WatchdogVerdict};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::command::{Command, ModeRequest, Reply};
use crate::error::RuntimeError;
use crate::handle::EngineHandle;
use crate::metrics::{MetricsSnapshot, RuntimeMetrics};
use crate::queue::SensorEventQueue;
use crate::transport::ChannelTransport;

/// Runtime tunables not covered by the engine settings
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Stop after this many polled batches
    pub max_batches: Option<u64>,
    /// Batches buffered between the poll loop and the engine task
    pub batch_channel_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_batches: None,
            batch_channel_capacity: 4,
        }
    }
}

/// Final accounting of a runtime
#[derive(Debug, Clone)]
pub struct RuntimeReport {
    pub ingestion: ingestion::MetricsSnapshot,
    pub runtime: MetricsSnapshot,
    pub dispatch: MetricsSummary,
    pub final_status: EngineStatus,
}

/// A running engine
pub struct EngineRuntime {
    handle: EngineHandle,
    metrics: Arc<RuntimeMetrics>,
    ingestion_metrics: Arc<IngestionMetrics>,
    stop: PollStopHandle,
    engine_task: JoinHandle<Result<RuntimeReport, RuntimeError>>,
    watchdog_task: JoinHandle<()>,
}

impl EngineRuntime {
    /// Start the poll loop, the engine task and the watchdog
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Invalid poll configuration derived from the engine settings.
    #[instrument(name = "runtime_spawn", skip_all)]
    pub fn spawn(engine: SensorEngine, options: RuntimeOptions) -> Result<Self, RuntimeError> {
        let settings = engine.settings().clone();
        let poll = PollLoop::new(
            engine.device(),
            PollConfig::new(engine.poll_limit(), settings.receive_buffer_events)
                .with_max_batches(options.max_batches),
        )?;
        let stop = poll.stop_handle();
        let ingestion_metrics = poll.metrics();

        let (batch_tx, batch_rx) = async_channel::bounded(options.batch_channel_capacity.max(1));
        let poll_task = tokio::task::spawn_blocking(move || poll.run(batch_tx));

        let (command_tx, command_rx) = mpsc::channel(settings.command_queue_capacity.max(1));
        let metrics = Arc::new(RuntimeMetrics::new());

        let watchdog_task = tokio::spawn(watchdog(
            command_tx.downgrade(),
            engine.wake_lock_watch(),
            settings.watchdog_interval(),
        ));

        let worker = EngineWorker {
            engine,
            commands: command_rx,
            self_tx: command_tx.downgrade(),
            batches: batch_rx,
            io_tasks: JoinSet::new(),
            metrics: Arc::clone(&metrics),
            aggregator: DispatchMetricsAggregator::new(),
            stop: stop.clone(),
            client_queue_capacity: settings.client_queue_capacity,
        };
        let engine_task = tokio::spawn(worker.run(poll_task));

        info!(
            command_queue_capacity = settings.command_queue_capacity,
            watchdog_interval_ms = settings.watchdog_interval_ms,
            "engine runtime started"
        );
        Ok(Self {
            handle: EngineHandle::new(command_tx),
            metrics,
            ingestion_metrics,
            stop,
            engine_task,
            watchdog_task,
        })
    }

    /// Handle for issuing requests; cheap to clone
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn metrics(&self) -> Arc<RuntimeMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn ingestion_metrics(&self) -> Arc<IngestionMetrics> {
        Arc::clone(&self.ingestion_metrics)
    }

    /// Whether the poll loop is still producing
    pub fn is_running(&self) -> bool {
        self.stop.is_running()
    }

    /// Wait for the engine to stop on its own (batch limit or device failure)
    pub async fn wait(self) -> Result<RuntimeReport, RuntimeError> {
        let Self {
            handle,
            engine_task,
            watchdog_task,
            ..
        } = self;
        drop(handle);
        let result = engine_task
            .await
            .map_err(|e| RuntimeError::task_failed("engine", e.to_string()))?;
        watchdog_task.abort();
        result
    }

    /// Stop the engine and collect the final report
    pub async fn shutdown(self) -> Result<RuntimeReport, RuntimeError> {
        if let Err(e) = self.handle.shutdown().await {
            debug!(error = %e, "engine already stopped");
        }
        self.wait().await
    }
}

/// Sleep until the wake lock is taken, then tick once per interval for as
/// long as it stays held.
async fn watchdog(
    commands: mpsc::WeakSender<Command>,
    mut held: watch::Receiver<bool>,
    interval: Duration,
) {
    loop {
        if held.wait_for(|held| *held).await.is_err() {
            break;
        }
        tokio::time::sleep(interval).await;
        let Some(tx) = commands.upgrade() else {
            break;
        };
        if tx.send(Command::WatchdogTick).await.is_err() {
            break;
        }
    }
    trace!("watchdog stopped");
}

async fn notify(commands: &mpsc::WeakSender<Command>, command: Command) -> bool {
    match commands.upgrade() {
        Some(tx) => tx.send(command).await.is_ok(),
        None => false,
    }
}

/// State owned by the engine task
struct EngineWorker {
    engine: SensorEngine,
    commands: mpsc::Receiver<Command>,
    /// Weak so the task ends once every handle is gone
    self_tx: mpsc::WeakSender<Command>,
    batches: async_channel::Receiver<EventBuffer>,
    io_tasks: JoinSet<()>,
    metrics: Arc<RuntimeMetrics>,
    aggregator: DispatchMetricsAggregator,
    stop: PollStopHandle,
    client_queue_capacity: usize,
}

impl EngineWorker {
    async fn run(
        mut self,
        poll_task: JoinHandle<ingestion::Result<ingestion::MetricsSnapshot>>,
    ) -> Result<RuntimeReport, RuntimeError> {
        let mut shutdown_reply = None;

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("all engine handles dropped");
                        break;
                    }
                },

                batch = self.batches.recv() => match batch {
                    Ok(mut batch) => self.dispatch(&mut batch),
                    Err(_) => {
                        debug!("batch channel closed");
                        break;
                    }
                },

                Some(joined) = self.io_tasks.join_next(), if !self.io_tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "connection task panicked");
                        }
                    }
                }
            }

            self.spawn_writable_waiters();
            self.metrics
                .set_live_connections(self.engine.connection_count());
        }

        self.teardown(poll_task, shutdown_reply).await
    }

    fn dispatch(&mut self, batch: &mut EventBuffer) {
        let report = self.engine.process_batch(batch);
        self.metrics.record_batch(&report);
        self.aggregator.update(&report);
    }

    fn handle_command(&mut self, command: Command) {
        let name = command.name();
        let success = match command {
            Command::CreateConnection {
                identity,
                mode,
                reply,
            } => {
                let result = self.create_connection(identity, mode);
                respond(reply, result)
            }
            Command::CloseConnection { connection, reply } => {
                let result = self.engine.close_connection(connection);
                if result.is_ok() {
                    self.metrics.inc_connections_closed();
                }
                respond(reply, result)
            }
            Command::Enable {
                connection,
                handle,
                period,
                max_latency,
                reply,
            } => respond(
                reply,
                self.engine.enable(connection, handle, period, max_latency),
            ),
            Command::Disable {
                connection,
                handle,
                reply,
            } => respond(reply, self.engine.disable(connection, handle)),
            Command::SetRate {
                connection,
                handle,
                period,
                reply,
            } => respond(reply, self.engine.set_rate(connection, handle, period)),
            Command::Flush { connection, reply } => respond(reply, self.engine.flush(connection)),
            Command::SetMode { request, reply } => {
                let result = match request {
                    ModeRequest::Normal => self.engine.exit_to_normal(),
                    ModeRequest::Restricted(package) => self.engine.enter_restricted(&package),
                    ModeRequest::DataInjection(package) => {
                        self.engine.enter_data_injection(&package)
                    }
                };
                respond(reply, result)
            }
            Command::SensorList { identity, reply } => {
                respond(reply, Ok(self.engine.sensor_list(&identity)))
            }
            Command::Status { reply } => respond(reply, Ok(self.engine.status())),
            Command::Client {
                connection,
                message,
            } => {
                let result = match message {
                    crate::transport::ClientMessage::Ack(count) => {
                        self.engine.on_ack(connection, count)
                    }
                    crate::transport::ClientMessage::Inject(event) => {
                        self.engine.inject(connection, event)
                    }
                };
                if let Err(ref e) = result {
                    warn!(connection = %connection, error = %e, "client message rejected");
                }
                result.is_ok()
            }
            Command::Hangup { connection } => match self.engine.on_hangup(connection) {
                Ok(()) => {
                    self.metrics.inc_connections_closed();
                    true
                }
                Err(e) => {
                    // already closed explicitly
                    trace!(connection = %connection, error = %e, "hangup ignored");
                    true
                }
            },
            Command::Writable { connection } => match self.engine.on_writable(connection) {
                Ok(still_waiting) => {
                    if still_waiting {
                        self.spawn_writable_waiter(connection);
                    }
                    true
                }
                Err(e) => {
                    trace!(connection = %connection, error = %e, "writable ignored");
                    true
                }
            },
            Command::WatchdogTick => {
                if self.engine.watchdog_tick() == WatchdogVerdict::Stuck {
                    self.metrics.inc_watchdog_releases();
                }
                true
            }
            Command::Shutdown { reply } => respond(reply, Ok(())),
        };

        self.metrics.record_command(success);
        observability::record_command(name, success);
    }

    fn create_connection(
        &mut self,
        identity: ClientIdentity,
        mode: ConnectionMode,
    ) -> Result<SensorEventQueue, EngineError> {
        let strong = self.self_tx.upgrade().ok_or(EngineError::ShuttingDown)?;
        let (transport, events) = ChannelTransport::pair(self.client_queue_capacity);
        let id = self
            .engine
            .create_connection(identity, mode, Box::new(transport))?;

        let (message_tx, mut message_rx) = mpsc::channel(self.client_queue_capacity.max(1));
        let commands = self.self_tx.clone();
        self.io_tasks.spawn(async move {
            while let Some(message) = message_rx.recv().await {
                if !notify(&commands, Command::Client { connection: id, message }).await {
                    return;
                }
            }
            notify(&commands, Command::Hangup { connection: id }).await;
        });

        self.metrics.inc_connections_opened();
        Ok(SensorEventQueue::new(
            id,
            EngineHandle::new(strong),
            events,
            message_tx,
        ))
    }

    fn spawn_writable_waiters(&mut self) {
        for id in self.engine.take_writable_requests() {
            self.spawn_writable_waiter(id);
        }
    }

    fn spawn_writable_waiter(&mut self, id: ConnectionId) {
        let Some(writable) = self.engine.writable_future(id) else {
            return;
        };
        let commands = self.self_tx.clone();
        self.io_tasks.spawn(async move {
            let command = match writable.await {
                Ok(()) => Command::Writable { connection: id },
                Err(_) => Command::Hangup { connection: id },
            };
            notify(&commands, command).await;
        });
    }

    async fn teardown(
        mut self,
        poll_task: JoinHandle<ingestion::Result<ingestion::MetricsSnapshot>>,
        shutdown_reply: Option<Reply<()>>,
    ) -> Result<RuntimeReport, RuntimeError> {
        self.stop.stop();
        self.batches.close();
        let polled = poll_task
            .await
            .map_err(|e| RuntimeError::task_failed("poll_loop", e.to_string()));

        let open: Vec<ConnectionId> = self
            .engine
            .status()
            .connections
            .iter()
            .map(|c| c.id)
            .collect();
        for id in open {
            if self.engine.close_connection(id).is_ok() {
                self.metrics.inc_connections_closed();
            }
        }
        self.io_tasks.abort_all();
        self.metrics.set_live_connections(0);

        if let Some(reply) = shutdown_reply {
            let _ = reply.send(Ok(()));
        }

        let ingestion = match polled {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                error!(error = %e, "engine stopped by device failure");
                return Err(e.into());
            }
            Err(e) => return Err(e),
        };

        let dispatch = self.aggregator.summary();
        info!(
            batches = self.metrics.batches(),
            events = ingestion.events,
            "engine runtime stopped"
        );
        Ok(RuntimeReport {
            ingestion,
            runtime: self.metrics.snapshot(),
            dispatch,
            final_status: self.engine.status(),
        })
    }
}

fn respond<T>(reply: Reply<T>, result: Result<T, EngineError>) -> bool {
    let success = result.is_ok();
    if let Err(ref e) = result {
        debug!(error = %e, "request failed");
    }
    // caller may have given up waiting
    let _ = reply.send(result);
    success
}
