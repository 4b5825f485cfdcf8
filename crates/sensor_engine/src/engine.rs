//! Main sensor engine implementation.
//!
//! `SensorEngine` is synchronous and owns every piece of shared state. The
//! dispatcher runs it inside a single task and feeds it one command at a
//! time, so no operation ever observes another half-done.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use contracts::{
    BatchReport, ClientIdentity, ConnectionId, ConnectionMode, DeviceError, DeviceMode,
    EngineBlueprint, EngineError, EngineSettings, EventBuffer, EventTransport, FusionSink,
    OperatingMode, SensorDescriptor, SensorDevice, SensorEvent, SensorHandle, WakeLockPrimitive,
    WritableFuture,
};
use serde::Serialize;
use slab::Slab;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::active::{ActiveSensors, RateRequest};
use crate::connection::{ClientConnection, ConnectionStats, DeliveryContext, SendOutcome};
use crate::last_value::LastValueCache;
use crate::mode::{ModeController, Transition};
use crate::registrations::{RegistrationLog, RegistrationRecord};
use crate::registry::SensorRegistry;
use crate::synthesis::{build_virtual_sensor, VirtualSynthesizer};
use crate::wake_lock::{WakeLockArbitrator, WatchdogVerdict};

/// Delivery limits derived from the settings once at construction
#[derive(Debug, Clone, Copy)]
struct DeliveryLimits {
    drain_chunk_events: usize,
    fallback_cache_events: usize,
}

impl DeliveryLimits {
    fn context<'a>(&self, registry: &'a SensorRegistry) -> DeliveryContext<'a> {
        DeliveryContext {
            registry,
            drain_chunk_events: self.drain_chunk_events,
            fallback_cache_events: self.fallback_cache_events,
        }
    }
}

/// The sensor event distribution engine
pub struct SensorEngine {
    settings: EngineSettings,
    device: Arc<dyn SensorDevice>,
    registry: SensorRegistry,
    last_values: LastValueCache,
    synthesizer: VirtualSynthesizer,
    active: ActiveSensors,
    connections: Slab<ClientConnection>,
    connection_index: HashMap<ConnectionId, usize>,
    next_connection_id: u64,
    wake_lock: WakeLockArbitrator,
    mode: ModeController,
    registrations: RegistrationLog,
    /// Physical handles currently activated at the device
    armed: BTreeSet<SensorHandle>,
    limits: DeliveryLimits,
    batch_seq: u64,
    /// Connections that started waiting for writability since the last take
    writable_requests: Vec<ConnectionId>,
}

impl std::fmt::Debug for SensorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorEngine")
            .field("sensors", &self.registry.len())
            .field("connections", &self.connections.len())
            .field("active", &self.active.len())
            .field("mode", self.mode.mode())
            .field("wake_lock", &self.wake_lock)
            .finish()
    }
}

impl SensorEngine {
    /// Create an engine over a populated registry
    pub fn new(
        settings: EngineSettings,
        device: Arc<dyn SensorDevice>,
        registry: SensorRegistry,
        wake_lock: Box<dyn WakeLockPrimitive>,
    ) -> Self {
        let batching = registry.batching_supported();
        let limits = DeliveryLimits {
            drain_chunk_events: settings.drain_chunk_events(batching),
            fallback_cache_events: settings.fallback_cache_events(),
        };
        let wake_lock = WakeLockArbitrator::new(wake_lock, settings.wake_lock_name.clone());
        info!(
            sensors = registry.len(),
            virtual_sensors = registry.virtual_count(),
            batching,
            drain_chunk_events = limits.drain_chunk_events,
            "sensor engine created"
        );
        Self {
            settings,
            device,
            registry,
            last_values: LastValueCache::new(),
            synthesizer: VirtualSynthesizer::new(),
            active: ActiveSensors::new(),
            connections: Slab::new(),
            connection_index: HashMap::new(),
            next_connection_id: 1,
            wake_lock,
            mode: ModeController::new(),
            registrations: RegistrationLog::new(),
            armed: BTreeSet::new(),
            limits,
            batch_seq: 0,
            writable_requests: Vec::new(),
        }
    }

    /// Build the registry (physical then virtual sensors) from a blueprint
    ///
    /// # Errors
    /// Duplicate handles or virtual sensors without a physical source.
    pub fn from_blueprint(
        blueprint: &EngineBlueprint,
        device: Arc<dyn SensorDevice>,
        wake_lock: Box<dyn WakeLockPrimitive>,
    ) -> Result<Self, EngineError> {
        let mut registry = SensorRegistry::new();
        for descriptor in blueprint.physical_descriptors() {
            registry.register_physical(descriptor)?;
        }
        for config in &blueprint.virtual_sensors {
            registry.register_virtual(
                config.to_descriptor(),
                config.source_handle(),
                build_virtual_sensor(config),
            )?;
        }
        Ok(Self::new(
            blueprint.engine.clone(),
            device,
            registry,
            wake_lock,
        ))
    }

    /// Attach a fusion sink fed with raw events while virtual sensors run
    pub fn with_fusion(mut self, fusion: Box<dyn FusionSink>) -> Self {
        self.synthesizer = std::mem::take(&mut self.synthesizer).with_fusion(fusion);
        self
    }

    // ===== Accessors =====

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    pub fn device(&self) -> Arc<dyn SensorDevice> {
        Arc::clone(&self.device)
    }

    pub fn operating_mode(&self) -> &OperatingMode {
        self.mode.mode()
    }

    pub fn is_wake_lock_held(&self) -> bool {
        self.wake_lock.is_held()
    }

    /// Held-state channel for the watchdog
    pub fn wake_lock_watch(&self) -> watch::Receiver<bool> {
        self.wake_lock.subscribe()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&ClientConnection> {
        self.connection_index
            .get(&id)
            .and_then(|&idx| self.connections.get(idx))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Whether the device currently has `handle` activated
    pub fn is_armed(&self, handle: SensorHandle) -> bool {
        self.armed.contains(&handle)
    }

    /// Events the device may return per poll.
    ///
    /// Leaves room for every registered virtual sensor to derive one event
    /// per raw event without overflowing the poll buffer.
    pub fn poll_limit(&self) -> usize {
        self.settings.receive_buffer_events / (1 + self.registry.virtual_count())
    }

    /// Buffer sized for `process_batch`
    pub fn new_poll_buffer(&self) -> EventBuffer {
        EventBuffer::with_capacity(self.settings.receive_buffer_events)
    }

    /// Connections that began waiting for a writable transport
    pub fn take_writable_requests(&mut self) -> Vec<ConnectionId> {
        std::mem::take(&mut self.writable_requests)
    }

    /// Readiness future for a connection's transport
    pub fn writable_future(&self, id: ConnectionId) -> Option<WritableFuture> {
        self.connection(id)
            .filter(|c| !c.is_dead())
            .map(ClientConnection::writable)
    }

    fn live_index(&self, id: ConnectionId) -> Result<usize, EngineError> {
        match self.connection_index.get(&id) {
            Some(&idx) if !self.connections[idx].is_dead() => Ok(idx),
            _ => Err(EngineError::UnknownConnection { connection: id }),
        }
    }

    fn note_outcome(&mut self, id: ConnectionId, outcome: &SendOutcome) {
        if outcome.newly_blocked {
            self.writable_requests.push(id);
        }
    }

    // ===== Connections =====

    /// Register a new client connection
    ///
    /// # Errors
    /// Data-injection connections need data-injection mode and the
    /// whitelisted package.
    #[instrument(
        name = "engine_create_connection",
        skip(self, identity, transport),
        fields(package = %identity.package, mode = ?mode)
    )]
    pub fn create_connection(
        &mut self,
        identity: ClientIdentity,
        mode: ConnectionMode,
        transport: Box<dyn EventTransport>,
    ) -> Result<ConnectionId, EngineError> {
        self.mode.check_connection(&identity, mode)?;

        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;
        let idx = self
            .connections
            .insert(ClientConnection::new(id, identity, mode, transport));
        self.connection_index.insert(id, idx);

        observability::record_active_connections(self.connections.len());
        info!(connection = %id, "connection created");
        Ok(id)
    }

    /// Tear a connection down: unsubscribe everywhere, drop its wake-lock
    /// credit and forget it.
    ///
    /// # Errors
    /// `UnknownConnection` if the id was never issued or is already closed.
    #[instrument(name = "engine_close_connection", skip(self), fields(connection = %id))]
    pub fn close_connection(&mut self, id: ConnectionId) -> Result<(), EngineError> {
        if !self.connection_index.contains_key(&id) {
            return Err(EngineError::UnknownConnection { connection: id });
        }
        self.remove_connection(id);
        self.reconcile_wake_lock();
        Ok(())
    }

    /// The client end hung up
    pub fn on_hangup(&mut self, id: ConnectionId) -> Result<(), EngineError> {
        info!(connection = %id, "connection hung up");
        if let Some(&idx) = self.connection_index.get(&id) {
            self.connections[idx].mark_dead();
        }
        self.close_connection(id)
    }

    fn remove_connection(&mut self, id: ConnectionId) {
        let Some(idx) = self.connection_index.remove(&id) else {
            return;
        };
        let mut conn = self.connections.remove(idx);
        conn.mark_dead();

        for handle in conn.subscribed_handles() {
            if let Err(e) = self.release_subscription(id, handle) {
                warn!(connection = %id, handle = %handle, error = %e, "device cleanup failed");
            }
        }

        if conn.mode() == ConnectionMode::DataInjection && self.mode.is_data_injection() {
            info!(connection = %id, "data injection client gone, resetting to normal mode");
            if let Err(e) = self.exit_to_normal() {
                error!(error = %e, "failed to reset to normal mode");
            }
        }

        observability::record_active_connections(self.connections.len());
        observability::record_active_sensors(self.active.len());
        debug!(connection = %id, "connection removed");
    }

    /// Remove connections whose transport reported closed
    fn reap_dead_connections(&mut self) {
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| c.is_dead())
            .map(|(_, c)| c.id())
            .collect();
        for id in dead {
            self.remove_connection(id);
        }
    }

    // ===== Subscriptions =====

    fn check_access(
        identity: &ClientIdentity,
        descriptor: &SensorDescriptor,
    ) -> Result<(), EngineError> {
        if identity.can_access(descriptor.required_permission.as_deref()) {
            Ok(())
        } else {
            Err(EngineError::permission_denied(
                identity.package.clone(),
                format!(
                    "sensor {} requires {}",
                    descriptor.handle,
                    descriptor.required_permission.as_deref().unwrap_or_default()
                ),
            ))
        }
    }

    /// Subscribe a connection to a sensor
    ///
    /// `period` is clamped up to the sensor's minimum delay.
    ///
    /// # Errors
    /// - `UnknownConnection`, `InvalidHandle`, `PermissionDenied` before any
    ///   state changes
    /// - `DeviceFailure` after rolling the subscription back
    #[instrument(
        name = "engine_enable",
        skip(self),
        fields(connection = %id, handle = %handle)
    )]
    pub fn enable(
        &mut self,
        id: ConnectionId,
        handle: SensorHandle,
        period: Duration,
        max_latency: Duration,
    ) -> Result<(), EngineError> {
        let idx = self.live_index(id)?;
        let descriptor = self.registry.require(handle)?.clone();
        Self::check_access(self.connections[idx].identity(), &descriptor)?;
        self.mode.check_caller(self.connections[idx].identity())?;

        let period = period.max(descriptor.min_delay);
        let rate = RateRequest::new(period, max_latency);
        let (record, created) = self.active.get_or_create(handle);
        let newly_added = record.add_subscriber(id, rate);
        let shared = record.subscriber_count() > 1;
        if created && descriptor.is_virtual {
            self.synthesizer.activate(handle, &mut self.registry);
        }

        if !self.connections[idx].add_subscription(handle) {
            warn!(connection = %id, handle = %handle, "sensor already enabled on connection");
        }

        if !created && newly_added && descriptor.is_on_change() {
            self.send_last_value(idx, handle);
        }

        let device_handle = self.registry.device_handle(handle).unwrap_or(handle);
        let mut result = self.apply_rate(device_handle);

        if result.is_ok()
            && shared
            && !descriptor.is_one_shot()
            && !descriptor.is_on_change()
            && !descriptor.is_virtual
        {
            self.connections[idx].set_first_flush_pending(handle, true);
            match self.device.flush(handle) {
                Ok(()) => {
                    if let Some(record) = self.active.get_mut(handle) {
                        record.push_pending_flush(id);
                    }
                }
                Err(e) => {
                    debug!(handle = %handle, error = %e, "first flush unavailable");
                    self.connections[idx].set_first_flush_pending(handle, false);
                }
            }
        }

        if result.is_ok() {
            result = self.arm(device_handle);
        }

        if let Err(e) = result {
            warn!(connection = %id, handle = %handle, error = %e, "enable failed, rolling back");
            self.connections[idx].remove_subscription(handle);
            if let Err(cleanup) = self.release_subscription(id, handle) {
                warn!(handle = %handle, error = %cleanup, "rollback cleanup failed");
            }
            return Err(e.into());
        }

        let package = self.connections[idx].identity().package.clone();
        self.registrations
            .record_enable(handle, &package, period, max_latency);
        observability::record_active_sensors(self.active.len());
        info!(
            period_us = period.as_micros() as u64,
            max_latency_us = max_latency.as_micros() as u64,
            "sensor enabled"
        );
        Ok(())
    }

    /// Hand the newest cached value of an on-change sensor to one connection
    fn send_last_value(&mut self, idx: usize, handle: SensorHandle) {
        let Some(mut event) = self.last_values.latest(handle) else {
            return;
        };
        event.sensor = handle;
        if self.registry.is_wake_up(handle) {
            self.wake_lock.acquire();
        }
        let ctx = self.limits.context(&self.registry);
        let conn = &mut self.connections[idx];
        let outcome = conn.send_unfiltered(std::slice::from_ref(&event), &ctx);
        let id = conn.id();
        observability::record_cache_dropped(outcome.dropped);
        self.note_outcome(id, &outcome);
        self.reconcile_wake_lock();
        trace!(connection = %id, handle = %handle, "last value delivered");
    }

    /// Unsubscribe a connection from a sensor
    ///
    /// # Errors
    /// `InvalidHandle` if the connection is not subscribed to `handle`.
    #[instrument(
        name = "engine_disable",
        skip(self),
        fields(connection = %id, handle = %handle)
    )]
    pub fn disable(&mut self, id: ConnectionId, handle: SensorHandle) -> Result<(), EngineError> {
        let idx = self.live_index(id)?;
        if !self.connections[idx].remove_subscription(handle) {
            return Err(EngineError::InvalidHandle { handle });
        }
        let result = self.release_subscription(id, handle);

        let package = self.connections[idx].identity().package.clone();
        self.registrations.record_disable(handle, &package);
        observability::record_active_sensors(self.active.len());
        self.reconcile_wake_lock();
        result.map_err(EngineError::from)?;
        info!("sensor disabled");
        Ok(())
    }

    /// Drop `id` from the active record of `handle` and bring the device in
    /// line. The connection side must already be unsubscribed.
    fn release_subscription(
        &mut self,
        id: ConnectionId,
        handle: SensorHandle,
    ) -> Result<(), DeviceError> {
        if let Some(record) = self.active.get_mut(handle) {
            record.remove_subscriber(id);
            if record.is_empty() {
                self.active.remove(handle);
                if self.synthesizer.is_active(handle) {
                    self.synthesizer.deactivate(handle, &mut self.registry);
                }
            }
        }
        let device_handle = self.registry.device_handle(handle).unwrap_or(handle);
        self.apply_rate(device_handle)
    }

    /// Change the sampling period of an existing subscription
    ///
    /// # Errors
    /// `InvalidHandle` if unknown or not subscribed, `PermissionDenied` per
    /// sensor permission or operating mode.
    #[instrument(
        name = "engine_set_rate",
        skip(self),
        fields(connection = %id, handle = %handle)
    )]
    pub fn set_rate(
        &mut self,
        id: ConnectionId,
        handle: SensorHandle,
        period: Duration,
    ) -> Result<(), EngineError> {
        let idx = self.live_index(id)?;
        let descriptor = self.registry.require(handle)?;
        let period = period.max(descriptor.min_delay);
        Self::check_access(self.connections[idx].identity(), descriptor)?;
        self.mode.check_caller(self.connections[idx].identity())?;
        if !self.connections[idx].is_subscribed(handle) {
            return Err(EngineError::InvalidHandle { handle });
        }

        if let Some(record) = self.active.get_mut(handle) {
            record.set_rate(id, period);
        }
        let device_handle = self.registry.device_handle(handle).unwrap_or(handle);
        self.apply_rate(device_handle)?;
        debug!(period_us = period.as_micros() as u64, "rate updated");
        Ok(())
    }

    /// Request a flush of every sensor the connection is subscribed to
    ///
    /// Sensors that cannot flush at the device get a trivial completion.
    /// One-shot sensors are skipped and reported with `InvalidOperation`
    /// after the remaining sensors were handled.
    #[instrument(name = "engine_flush", skip(self), fields(connection = %id))]
    pub fn flush(&mut self, id: ConnectionId) -> Result<(), EngineError> {
        let idx = self.live_index(id)?;
        self.mode.check_caller(self.connections[idx].identity())?;

        let mut first_error = None;
        for handle in self.connections[idx].subscribed_handles() {
            let Some(descriptor) = self.registry.descriptor(handle) else {
                continue;
            };
            if descriptor.is_one_shot() {
                first_error.get_or_insert(EngineError::invalid_operation(
                    handle,
                    "one-shot sensors cannot be flushed",
                ));
                continue;
            }
            if descriptor.is_virtual {
                self.connections[idx].increment_pending_flush(handle);
                continue;
            }
            match self.device.flush(handle) {
                Ok(()) => {
                    if let Some(record) = self.active.get_mut(handle) {
                        record.push_pending_flush(id);
                    }
                }
                Err(DeviceError::Unsupported) => {
                    self.connections[idx].increment_pending_flush(handle);
                }
                Err(e) => {
                    first_error.get_or_insert(EngineError::DeviceFailure(e));
                }
            }
        }

        let ctx = self.limits.context(&self.registry);
        let outcome = self.connections[idx].send_pending_flush_events(&ctx);
        observability::record_flush_synthesized(outcome.flush_synthesized);
        self.note_outcome(id, &outcome);
        self.reap_dead_connections();
        self.reconcile_wake_lock();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ===== Device control =====

    /// Fastest rate requested for a physical handle, counting the
    /// subscribers of virtual sensors computed from it
    fn device_demand(&self, device_handle: SensorHandle) -> Option<RateRequest> {
        let own = self
            .active
            .get(device_handle)
            .and_then(|r| r.aggregated_rate());
        self.registry
            .virtuals_of(device_handle)
            .filter_map(|v| self.active.get(v).and_then(|r| r.aggregated_rate()))
            .chain(own)
            .reduce(|a, b| RateRequest::new(a.period.min(b.period), a.max_latency.min(b.max_latency)))
    }

    /// Push the aggregated rate to the device, or deactivate when nobody
    /// needs the sensor any more. Never activates.
    fn apply_rate(&mut self, device_handle: SensorHandle) -> Result<(), DeviceError> {
        match self.device_demand(device_handle) {
            None => {
                if self.armed.remove(&device_handle) {
                    self.device.activate(device_handle, false)?;
                    debug!(handle = %device_handle, "sensor deactivated at device");
                }
                Ok(())
            }
            Some(rate) => {
                match self
                    .device
                    .batch(device_handle, rate.period, rate.max_latency)
                {
                    Err(DeviceError::Unsupported) if rate.max_latency.is_zero() => {
                        self.device.set_delay(device_handle, rate.period)
                    }
                    other => other,
                }
            }
        }
    }

    fn arm(&mut self, device_handle: SensorHandle) -> Result<(), DeviceError> {
        if !self.armed.contains(&device_handle) {
            self.device.activate(device_handle, true)?;
            self.armed.insert(device_handle);
            debug!(handle = %device_handle, "sensor activated at device");
        }
        Ok(())
    }

    /// Deactivate every armed sensor, keeping the bookkeeping.
    /// Returns what was armed.
    fn disarm_all(&mut self) -> Vec<SensorHandle> {
        let armed: Vec<SensorHandle> = std::mem::take(&mut self.armed).into_iter().collect();
        for &handle in &armed {
            if let Err(e) = self.device.activate(handle, false) {
                warn!(handle = %handle, error = %e, "failed to deactivate sensor");
            }
        }
        armed
    }

    /// Re-arm every sensor that still has subscribers
    fn rearm_all(&mut self) -> Result<(), EngineError> {
        let demanded: BTreeSet<SensorHandle> = self
            .active
            .handles()
            .into_iter()
            .filter_map(|h| self.registry.device_handle(h))
            .collect();
        let mut first_error = None;
        for handle in demanded {
            if let Err(e) = self.apply_rate(handle).and_then(|_| self.arm(handle)) {
                warn!(handle = %handle, error = %e, "failed to re-activate sensor");
                first_error.get_or_insert(EngineError::DeviceFailure(e));
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ===== Batch processing =====

    /// Run one polled batch through synthesis, flush attribution and
    /// dispatch to every connection.
    #[instrument(
        name = "engine_process_batch",
        level = "trace",
        skip(self, batch),
        fields(events = batch.len())
    )]
    pub fn process_batch(&mut self, batch: &mut EventBuffer) -> BatchReport {
        self.batch_seq += 1;
        let mut report = BatchReport {
            batch_id: self.batch_seq,
            polled: batch.len(),
            ..Default::default()
        };

        batch.clear_transient_flags();

        let has_wake_up = batch
            .iter()
            .any(|e| self.registry.is_wake_up(e.target_handle()));
        if has_wake_up {
            self.wake_lock.acquire();
        }

        for event in batch.iter() {
            self.last_values.record(event);
        }

        report.synthesized =
            self.synthesizer
                .synthesize(batch, &mut self.registry, &mut self.last_values);

        let mut attribution = Vec::with_capacity(batch.len());
        for event in batch.iter() {
            if event.is_flush_complete() {
                report.flush_markers += 1;
                let owner = self
                    .active
                    .get_mut(event.target_handle())
                    .and_then(|r| r.pop_pending_flush());
                if owner.is_none() {
                    report.unattributed_flushes += 1;
                }
                attribution.push(owner);
            } else {
                attribution.push(None);
            }
        }

        let ctx = self.limits.context(&self.registry);
        let mut blocked = Vec::new();
        for (_, conn) in self.connections.iter_mut() {
            if conn.is_dead() || conn.subscription_count() == 0 {
                continue;
            }
            report.connections += 1;
            let outcome = conn.send(batch, &attribution, &ctx);
            report.delivered += outcome.delivered;
            report.cached += outcome.cached;
            report.dropped += outcome.dropped;
            report.flush_synthesized += outcome.flush_synthesized;
            if outcome.newly_blocked {
                blocked.push(conn.id());
            }
        }
        self.writable_requests.extend(blocked);

        report.one_shot_disabled = self.disable_fired_one_shots(batch);
        self.reap_dead_connections();
        self.reconcile_wake_lock();
        report.wake_lock_held = self.wake_lock.is_held();

        observability::record_batch_metrics(&report);
        trace!(
            batch_id = report.batch_id,
            delivered = report.delivered,
            cached = report.cached,
            "batch dispatched"
        );
        report
    }

    /// One-shot sensors disarm themselves after firing; drop their
    /// subscriptions so the bookkeeping matches the device.
    fn disable_fired_one_shots(&mut self, batch: &EventBuffer) -> usize {
        let fired: BTreeSet<SensorHandle> = batch
            .iter()
            .filter(|e| !e.is_flush_complete())
            .map(|e| e.sensor)
            .filter(|h| self.registry.descriptor(*h).is_some_and(|d| d.is_one_shot()))
            .collect();

        let mut disabled = 0;
        for handle in fired {
            let Some(record) = self.active.remove(handle) else {
                continue;
            };
            for id in record.subscribers() {
                if let Some(&idx) = self.connection_index.get(&id) {
                    if self.connections[idx].remove_subscription(handle) {
                        disabled += 1;
                    }
                }
            }
            self.armed.remove(&handle);
            debug!(handle = %handle, "one-shot sensor auto-disabled");
        }
        disabled
    }

    // ===== Connection IO =====

    /// The transport of `id` can take more data: drain its cache.
    ///
    /// Returns whether the connection still waits for writability.
    pub fn on_writable(&mut self, id: ConnectionId) -> Result<bool, EngineError> {
        let idx = self.live_index(id)?;
        let ctx = self.limits.context(&self.registry);
        let conn = &mut self.connections[idx];
        let refs_before = conn.wake_lock_ref_count();
        let outcome = conn.drain_cache(&ctx);
        let still_waiting = conn.wants_writable();
        let wake_drained = conn.wake_lock_ref_count() != refs_before;
        observability::record_flush_synthesized(outcome.flush_synthesized);
        trace!(connection = %id, delivered = outcome.delivered, still_waiting, "writable");

        // only draining wake-up events counts toward the watchdog
        if wake_drained {
            self.wake_lock.note_activity();
        }
        self.reap_dead_connections();
        self.reconcile_wake_lock();
        Ok(still_waiting && !outcome.closed)
    }

    /// Client acknowledged `count` wake-up events
    pub fn on_ack(&mut self, id: ConnectionId, count: u32) -> Result<(), EngineError> {
        let idx = self.live_index(id)?;
        let remaining = self.connections[idx].apply_ack(count);
        trace!(connection = %id, count, remaining, "ack");
        self.wake_lock.note_activity();
        self.reconcile_wake_lock();
        Ok(())
    }

    /// Push a client-supplied event into the device
    ///
    /// # Errors
    /// - `InvalidOperatingMode` unless a data-injection connection pushes in
    ///   data-injection mode
    /// - `InvalidArgument` for flush-complete markers
    /// - `InvalidHandle` for unknown sensors
    #[instrument(
        name = "engine_inject",
        level = "debug",
        skip(self, event),
        fields(connection = %id, handle = %event.sensor)
    )]
    pub fn inject(&mut self, id: ConnectionId, mut event: SensorEvent) -> Result<(), EngineError> {
        let idx = self.live_index(id)?;
        if self.connections[idx].mode() != ConnectionMode::DataInjection {
            warn!("event pushed on a normal connection, dropped");
            return Err(EngineError::invalid_mode(
                "only data injection connections may inject events",
            ));
        }
        if !self.mode.is_data_injection() {
            return Err(EngineError::invalid_mode("engine is not in data_injection mode"));
        }
        if event.is_flush_complete() {
            return Err(EngineError::invalid_argument(
                "flush-complete markers cannot be injected",
            ));
        }
        let descriptor = self.registry.require(event.sensor)?;
        event.sensor_type = descriptor.sensor_type;
        event.needs_ack = false;
        self.device.inject(event)?;
        Ok(())
    }

    /// Periodic wake-lock check. A lock held without any activity for a
    /// full interval is force-released and every credit cleared.
    pub fn watchdog_tick(&mut self) -> WatchdogVerdict {
        let verdict = self.wake_lock.watchdog_check();
        if verdict == WatchdogVerdict::Stuck {
            warn!(
                connections = self.connections.len(),
                "wake lock stuck, clearing all acknowledgment credit"
            );
            for (_, conn) in self.connections.iter_mut() {
                conn.reset_wake_lock_ref_count();
            }
            self.wake_lock.release();
            observability::record_wake_lock_watchdog_release();
        }
        verdict
    }

    fn reconcile_wake_lock(&mut self) {
        let needed = self
            .connections
            .iter()
            .any(|(_, c)| c.needs_wake_lock());
        self.wake_lock.reconcile(needed);
    }

    // ===== Operating modes =====

    /// Stop all sensors and only accept requests from `package`
    #[instrument(name = "engine_enter_restricted", skip(self))]
    pub fn enter_restricted(&mut self, package: &str) -> Result<(), EngineError> {
        if self.mode.plan_restricted()? == Transition::Unchanged {
            return Ok(());
        }
        self.disarm_all();

        // Flushes in flight will never complete; owe trivial completions
        // for explicit ones and give up on implicit first flushes.
        let mut orphaned = Vec::new();
        for (handle, record) in self.active.iter_mut() {
            for id in record.clear_pending_flush() {
                orphaned.push((id, handle));
            }
        }
        for (id, handle) in orphaned {
            let Some(&idx) = self.connection_index.get(&id) else {
                continue;
            };
            let conn = &mut self.connections[idx];
            if conn.flush_info(handle).is_some_and(|f| f.first_flush_pending) {
                conn.set_first_flush_pending(handle, false);
            } else {
                conn.increment_pending_flush(handle);
            }
        }
        self.deliver_pending_flushes();

        self.mode.commit(OperatingMode::Restricted(package.to_string()));
        observability::record_mode_transition("restricted");
        info!(package, "entered restricted mode");
        Ok(())
    }

    /// Stop all sensors and feed the device from `package`'s injections
    ///
    /// # Errors
    /// `InvalidOperatingMode` from restricted mode; `DeviceFailure` if the
    /// device refuses injection mode, in which case sensors are re-activated
    /// and the mode stays normal.
    #[instrument(name = "engine_enter_data_injection", skip(self))]
    pub fn enter_data_injection(&mut self, package: &str) -> Result<(), EngineError> {
        if self.mode.plan_data_injection()? == Transition::Unchanged {
            return Ok(());
        }
        let suspended = self.disarm_all();
        if let Err(e) = self.device.set_mode(DeviceMode::DataInjection) {
            error!(error = %e, "device refused data injection mode");
            for handle in suspended {
                if let Err(e) = self.arm(handle) {
                    warn!(handle = %handle, error = %e, "failed to re-activate sensor");
                }
            }
            return Err(e.into());
        }

        self.mode
            .commit(OperatingMode::DataInjection(package.to_string()));
        observability::record_mode_transition("data_injection");
        info!(package, "entered data injection mode");
        Ok(())
    }

    /// Return to normal mode and re-activate every subscribed sensor
    #[instrument(name = "engine_exit_to_normal", skip(self))]
    pub fn exit_to_normal(&mut self) -> Result<(), EngineError> {
        if self.mode.plan_normal() == Transition::Unchanged {
            return Ok(());
        }
        let previous = self.mode.commit(OperatingMode::Normal);
        let mut result = Ok(());
        if matches!(previous, OperatingMode::DataInjection(_)) {
            if let Err(e) = self.device.set_mode(DeviceMode::Normal) {
                error!(error = %e, "device refused normal mode");
                result = Err(EngineError::DeviceFailure(e));
            }
        }
        let rearmed = self.rearm_all();
        observability::record_mode_transition("normal");
        info!(from = %previous, "returned to normal mode");
        result.and(rearmed)
    }

    fn deliver_pending_flushes(&mut self) {
        let ctx = self.limits.context(&self.registry);
        let mut blocked = Vec::new();
        let mut synthesized = 0;
        for (_, conn) in self.connections.iter_mut() {
            if !conn.has_pending_flush_events() {
                continue;
            }
            let outcome = conn.send_pending_flush_events(&ctx);
            synthesized += outcome.flush_synthesized;
            if outcome.newly_blocked {
                blocked.push(conn.id());
            }
        }
        self.writable_requests.extend(blocked);
        observability::record_flush_synthesized(synthesized);
        self.reap_dead_connections();
        self.reconcile_wake_lock();
    }

    // ===== Introspection =====

    /// Sensors visible to `identity`
    pub fn sensor_list(&self, identity: &ClientIdentity) -> Vec<SensorDescriptor> {
        self.registry.visible_to(identity)
    }

    pub fn recent_registrations(&self) -> Vec<RegistrationRecord> {
        self.registrations.recent()
    }

    /// Recent events of one sensor, oldest first
    pub fn last_events(&self, handle: SensorHandle) -> Vec<SensorEvent> {
        self.last_values.recent(handle)
    }

    /// Snapshot for dumps and the CLI
    pub fn status(&self) -> EngineStatus {
        let connections = self
            .connections
            .iter()
            .map(|(_, c)| ConnectionStatus {
                id: c.id(),
                package: c.identity().package.clone(),
                mode: c.mode(),
                subscriptions: c.subscribed_handles(),
                cache_len: c.cache_len(),
                max_cache_size: c.max_cache_size(),
                wake_lock_ref_count: c.wake_lock_ref_count(),
                dead: c.is_dead(),
                stats: c.stats(),
            })
            .collect();
        let active_sensors = self
            .active
            .iter()
            .map(|(handle, record)| {
                let rate = record.aggregated_rate();
                ActiveSensorStatus {
                    handle,
                    subscribers: record.subscribers().collect(),
                    pending_flushes: record.pending_flush_len(),
                    period_us: rate.map(|r| r.period.as_micros() as u64),
                    max_latency_us: rate.map(|r| r.max_latency.as_micros() as u64),
                }
            })
            .collect();
        EngineStatus {
            mode: self.mode.mode().clone(),
            wake_lock_held: self.wake_lock.is_held(),
            batches_processed: self.batch_seq,
            sensors: self.registry.len(),
            armed: self.armed.iter().copied().collect(),
            active_virtual: self.synthesizer.active_handles().collect(),
            derived_dropped: self.synthesizer.overflow_dropped(),
            connections,
            active_sensors,
            recent_registrations: self.registrations.recent(),
        }
    }
}

/// Engine snapshot
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub mode: OperatingMode,
    pub wake_lock_held: bool,
    pub batches_processed: u64,
    pub sensors: usize,
    pub armed: Vec<SensorHandle>,
    pub active_virtual: Vec<SensorHandle>,
    pub derived_dropped: u64,
    pub connections: Vec<ConnectionStatus>,
    pub active_sensors: Vec<ActiveSensorStatus>,
    pub recent_registrations: Vec<RegistrationRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub id: ConnectionId,
    pub package: String,
    pub mode: ConnectionMode,
    pub subscriptions: Vec<SensorHandle>,
    pub cache_len: usize,
    pub max_cache_size: usize,
    pub wake_lock_ref_count: u32,
    pub dead: bool,
    pub stats: ConnectionStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveSensorStatus {
    pub handle: SensorHandle,
    pub subscribers: Vec<ConnectionId>,
    pub pending_flushes: usize,
    pub period_us: Option<u64>,
    pub max_latency_us: Option<u64>,
}
