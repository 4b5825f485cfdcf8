//! Client connection
//!
//! Turns a global batch into the subset one client should see and gets it to
//! the client, or parks it in a bounded local cache when the transport pushes
//! back. Also carries the connection's wake-lock credit.
//!
//! ## Filtering
//!
//! For each event in batch order:
//! - skip handles this connection is not subscribed to (flush markers are keyed
//!   by their embedded target)
//! - a flush marker attributed to this connection while `first_flush_pending`
//!   is set resolves the implicit subscribe-time flush and is swallowed
//! - while `first_flush_pending` is set, everything else for that handle is
//!   swallowed
//! - flush markers are forwarded only to the attributed connection
//!
//! ## Caching
//!
//! Once anything is cached, new traffic is appended behind it until the cache
//! drains, so per-connection FIFO order holds. Overflow drops the oldest events
//! and turns every dropped flush marker into a pending trivial completion.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use contracts::{
    ClientIdentity, ConnectionId, ConnectionMode, EventTransport, SensorEvent, SensorHandle,
    TransportError, WritableFuture,
};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::registry::SensorRegistry;

/// Per-handle flush bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushInfo {
    /// The implicit flush issued at subscribe time has not completed yet
    pub first_flush_pending: bool,
    /// Trivial flush completions owed to the client
    pub pending_flush_count: u32,
}

/// Read-only inputs a connection needs to deliver events
#[derive(Clone, Copy)]
pub struct DeliveryContext<'a> {
    pub registry: &'a SensorRegistry,
    /// Largest write issued while draining the cache
    pub drain_chunk_events: usize,
    /// Cache size when no subscribed sensor declares a FIFO
    pub fallback_cache_events: usize,
}

/// What happened to one `send`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOutcome {
    /// Events handed to the transport
    pub delivered: usize,
    /// Events parked in the local cache
    pub cached: usize,
    /// Events dropped from the cache on overflow
    pub dropped: usize,
    /// Trivial flush completions written
    pub flush_synthesized: usize,
    /// The connection just registered for writable notifications
    pub newly_blocked: bool,
    /// The transport reported the peer gone
    pub closed: bool,
}

impl SendOutcome {
    fn merge(&mut self, other: SendOutcome) {
        self.delivered += other.delivered;
        self.cached += other.cached;
        self.dropped += other.dropped;
        self.flush_synthesized += other.flush_synthesized;
        self.newly_blocked |= other.newly_blocked;
        self.closed |= other.closed;
    }
}

/// Lifetime counters of a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub events_delivered: u64,
    pub events_cached: u64,
    pub events_dropped: u64,
    pub flush_synthesized: u64,
    pub acks_received: u64,
    pub would_block: u64,
}

/// One client subscription context
pub struct ClientConnection {
    id: ConnectionId,
    identity: ClientIdentity,
    mode: ConnectionMode,
    subscriptions: BTreeMap<SensorHandle, FlushInfo>,
    transport: Box<dyn EventTransport>,
    cache: VecDeque<SensorEvent>,
    max_cache_size: usize,
    wake_lock_ref_count: u32,
    dead: bool,
    wants_writable: bool,
    stats: ConnectionStats,
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("package", &self.identity.package)
            .field("mode", &self.mode)
            .field("subscriptions", &self.subscriptions.len())
            .field("cache_len", &self.cache.len())
            .field("wake_lock_ref_count", &self.wake_lock_ref_count)
            .field("dead", &self.dead)
            .finish()
    }
}

impl ClientConnection {
    pub fn new(
        id: ConnectionId,
        identity: ClientIdentity,
        mode: ConnectionMode,
        transport: Box<dyn EventTransport>,
    ) -> Self {
        Self {
            id,
            identity,
            mode,
            subscriptions: BTreeMap::new(),
            transport,
            cache: VecDeque::new(),
            max_cache_size: 0,
            wake_lock_ref_count: 0,
            dead: false,
            wants_writable: false,
            stats: ConnectionStats::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    #[inline]
    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    #[inline]
    pub fn wake_lock_ref_count(&self) -> u32 {
        self.wake_lock_ref_count
    }

    /// Whether this connection currently keeps the wake lock wanted
    #[inline]
    pub fn needs_wake_lock(&self) -> bool {
        !self.dead && self.wake_lock_ref_count > 0
    }

    #[inline]
    pub fn wants_writable(&self) -> bool {
        self.wants_writable
    }

    #[inline]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    #[inline]
    pub fn max_cache_size(&self) -> usize {
        self.max_cache_size
    }

    #[inline]
    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    pub fn is_subscribed(&self, handle: SensorHandle) -> bool {
        self.subscriptions.contains_key(&handle)
    }

    #[inline]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn subscribed_handles(&self) -> Vec<SensorHandle> {
        self.subscriptions.keys().copied().collect()
    }

    pub fn flush_info(&self, handle: SensorHandle) -> Option<FlushInfo> {
        self.subscriptions.get(&handle).copied()
    }

    /// Subscribe to a handle. Returns true if it is new.
    pub fn add_subscription(&mut self, handle: SensorHandle) -> bool {
        if self.subscriptions.contains_key(&handle) {
            return false;
        }
        self.subscriptions.insert(handle, FlushInfo::default());
        true
    }

    /// Unsubscribe from a handle. Returns true if it was subscribed.
    pub fn remove_subscription(&mut self, handle: SensorHandle) -> bool {
        self.subscriptions.remove(&handle).is_some()
    }

    pub fn set_first_flush_pending(&mut self, handle: SensorHandle, pending: bool) {
        if let Some(info) = self.subscriptions.get_mut(&handle) {
            info.first_flush_pending = pending;
        }
    }

    /// Owe the client one trivial flush completion for `handle`
    pub fn increment_pending_flush(&mut self, handle: SensorHandle) {
        if let Some(info) = self.subscriptions.get_mut(&handle) {
            info.pending_flush_count += 1;
        }
    }

    pub fn has_pending_flush_events(&self) -> bool {
        self.subscriptions
            .values()
            .any(|info| info.pending_flush_count > 0)
    }

    /// Mark the connection dead: it drops its cache and wake-lock credit and
    /// never writes again.
    pub fn mark_dead(&mut self) {
        if !self.dead {
            debug!(connection = %self.id, "connection marked dead");
        }
        self.dead = true;
        self.wake_lock_ref_count = 0;
        self.wants_writable = false;
        self.cache.clear();
    }

    /// Apply a client acknowledgment of `n` wake-up events.
    ///
    /// `0 < n < ref_count` subtracts; anything else clears the count.
    pub fn apply_ack(&mut self, n: u32) -> u32 {
        self.stats.acks_received += u64::from(n);
        if n > 0 && n < self.wake_lock_ref_count {
            self.wake_lock_ref_count -= n;
        } else {
            self.wake_lock_ref_count = 0;
        }
        self.wake_lock_ref_count
    }

    pub fn reset_wake_lock_ref_count(&mut self) {
        self.wake_lock_ref_count = 0;
    }

    /// Readiness future of the underlying transport
    pub fn writable(&self) -> WritableFuture {
        self.transport.writable()
    }

    /// Cache size implied by the FIFO depths of the subscribed sensors.
    ///
    /// Wake-up and non-wake-up sensors are tallied separately: reserved
    /// FIFOs add up, shared FIFOs contribute their maximum.
    pub fn compute_max_cache_size(&self, ctx: &DeliveryContext<'_>) -> usize {
        let mut wake_up = 0usize;
        let mut non_wake_up = 0usize;
        for handle in self.subscriptions.keys() {
            let Some(desc) = ctx.registry.descriptor(*handle) else {
                continue;
            };
            let slot = if desc.wake_up {
                &mut wake_up
            } else {
                &mut non_wake_up
            };
            if desc.has_reserved_fifo() {
                *slot += desc.fifo_reserved_events as usize;
            } else {
                *slot = (*slot).max(desc.fifo_max_events as usize);
            }
        }
        match wake_up + non_wake_up {
            0 => ctx.fallback_cache_events,
            total => total,
        }
    }

    /// Filter `batch` for this connection and deliver the result.
    ///
    /// `attribution[i]` names the connection a flush marker at `batch[i]`
    /// belongs to. Transport failures are absorbed here.
    pub fn send(
        &mut self,
        batch: &[SensorEvent],
        attribution: &[Option<ConnectionId>],
        ctx: &DeliveryContext<'_>,
    ) -> SendOutcome {
        if self.dead {
            return SendOutcome::default();
        }

        let mut scratch = Vec::new();
        for (i, event) in batch.iter().enumerate() {
            let Some(info) = self.subscriptions.get_mut(&event.target_handle()) else {
                continue;
            };
            if event.is_flush_complete() {
                let mine = attribution.get(i).copied().flatten() == Some(self.id);
                if info.first_flush_pending {
                    if mine {
                        info.first_flush_pending = false;
                        trace!(
                            connection = %self.id,
                            handle = %event.target_handle(),
                            "first flush resolved"
                        );
                    }
                    continue;
                }
                if mine {
                    scratch.push(*event);
                }
            } else if !info.first_flush_pending {
                scratch.push(*event);
            }
        }

        let mut outcome = self.send_pending_flush_events(ctx);
        outcome.merge(self.deliver(scratch, ctx));
        outcome
    }

    /// Deliver already-filtered events (e.g. a cached last value)
    pub fn send_unfiltered(
        &mut self,
        events: &[SensorEvent],
        ctx: &DeliveryContext<'_>,
    ) -> SendOutcome {
        if self.dead {
            return SendOutcome::default();
        }
        self.deliver(events.to_vec(), ctx)
    }

    fn deliver(&mut self, mut events: Vec<SensorEvent>, ctx: &DeliveryContext<'_>) -> SendOutcome {
        let mut outcome = SendOutcome::default();
        if events.is_empty() {
            return outcome;
        }

        if !self.cache.is_empty() {
            outcome.cached = events.len();
            outcome.dropped = self.append_to_cache(events, ctx);
            return outcome;
        }

        let flagged = flag_wake_up_events(&mut events, ctx.registry);
        self.wake_lock_ref_count += flagged;

        match self.transport.try_write(&events) {
            Ok(_) => {
                outcome.delivered = events.len();
                self.stats.events_delivered += events.len() as u64;
            }
            Err(TransportError::WouldBlock) => {
                self.wake_lock_ref_count = self.wake_lock_ref_count.saturating_sub(flagged);
                for event in &mut events {
                    event.needs_ack = false;
                }
                self.stats.would_block += 1;
                self.max_cache_size = self.compute_max_cache_size(ctx);
                outcome.cached = events.len();
                outcome.dropped = self.append_to_cache(events, ctx);
                outcome.newly_blocked = !self.wants_writable;
                self.wants_writable = true;
                debug!(
                    connection = %self.id,
                    cache_len = self.cache.len(),
                    max_cache_size = self.max_cache_size,
                    "transport would block, caching"
                );
            }
            Err(TransportError::Closed) => {
                warn!(connection = %self.id, "transport closed during send");
                self.mark_dead();
                outcome.closed = true;
            }
        }
        outcome
    }

    /// Append to the cache, dropping the oldest events on overflow.
    /// Returns how many events were dropped.
    fn append_to_cache(&mut self, events: Vec<SensorEvent>, ctx: &DeliveryContext<'_>) -> usize {
        if self.max_cache_size == 0 {
            self.max_cache_size = self.compute_max_cache_size(ctx);
        }
        let needed = self.cache.len() + events.len();
        if needed > self.max_cache_size {
            self.max_cache_size = self.compute_max_cache_size(ctx);
        }

        let overflow = needed.saturating_sub(self.max_cache_size);
        let mut incoming = events.into_iter();
        for _ in 0..overflow {
            let victim = match self.cache.pop_front() {
                Some(event) => Some(event),
                None => incoming.next(),
            };
            if let Some(event) = victim {
                if event.is_flush_complete() {
                    if let Some(info) = self.subscriptions.get_mut(&event.target_handle()) {
                        info.pending_flush_count += 1;
                    }
                }
            }
        }
        if overflow > 0 {
            warn!(
                connection = %self.id,
                dropped = overflow,
                max_cache_size = self.max_cache_size,
                "cache overflow, dropped oldest events"
            );
        }

        let before = self.cache.len();
        self.cache.extend(incoming);
        self.stats.events_cached += (self.cache.len() - before) as u64;
        self.stats.events_dropped += overflow as u64;
        overflow
    }

    /// Write owed trivial flush completions. Only runs with an empty cache so
    /// a completion never overtakes data queued before it.
    pub fn send_pending_flush_events(&mut self, ctx: &DeliveryContext<'_>) -> SendOutcome {
        let mut outcome = SendOutcome::default();
        if self.dead || !self.cache.is_empty() {
            return outcome;
        }

        let mut closed = false;
        'sensors: for (handle, info) in self.subscriptions.iter_mut() {
            while info.pending_flush_count > 0 {
                let mut event = SensorEvent::flush_complete(*handle, 0);
                let wake_up = ctx.registry.is_wake_up(*handle);
                if wake_up {
                    event.needs_ack = true;
                    self.wake_lock_ref_count += 1;
                }
                match self.transport.try_write(std::slice::from_ref(&event)) {
                    Ok(_) => {
                        info.pending_flush_count -= 1;
                        outcome.flush_synthesized += 1;
                        outcome.delivered += 1;
                    }
                    Err(TransportError::WouldBlock) => {
                        if wake_up {
                            self.wake_lock_ref_count = self.wake_lock_ref_count.saturating_sub(1);
                        }
                        outcome.newly_blocked = !self.wants_writable;
                        self.wants_writable = true;
                        break 'sensors;
                    }
                    Err(TransportError::Closed) => {
                        closed = true;
                        break 'sensors;
                    }
                }
            }
        }

        self.stats.flush_synthesized += outcome.flush_synthesized as u64;
        self.stats.events_delivered += outcome.delivered as u64;
        if closed {
            self.mark_dead();
            outcome.closed = true;
        }
        outcome
    }

    /// Drain the cache in chunks after the transport became writable.
    ///
    /// A would-block keeps the unsent tail at the front of the cache and the
    /// writable registration in place. A full drain clears the registration
    /// and then writes any owed flush completions.
    pub fn drain_cache(&mut self, ctx: &DeliveryContext<'_>) -> SendOutcome {
        let mut outcome = SendOutcome::default();
        if self.dead {
            return outcome;
        }

        let chunk_size = ctx.drain_chunk_events.max(1);
        let mut sent = 0;
        while sent < self.cache.len() {
            let n = (self.cache.len() - sent).min(chunk_size);
            let mut chunk: Vec<SensorEvent> = self.cache.range(sent..sent + n).copied().collect();
            let flagged = flag_wake_up_events(&mut chunk, ctx.registry);
            self.wake_lock_ref_count += flagged;

            match self.transport.try_write(&chunk) {
                Ok(_) => sent += n,
                Err(TransportError::WouldBlock) => {
                    self.wake_lock_ref_count = self.wake_lock_ref_count.saturating_sub(flagged);
                    self.cache.drain(..sent);
                    self.wants_writable = true;
                    self.stats.would_block += 1;
                    self.stats.events_delivered += sent as u64;
                    outcome.delivered = sent;
                    trace!(
                        connection = %self.id,
                        sent,
                        remaining = self.cache.len(),
                        "partial cache drain"
                    );
                    return outcome;
                }
                Err(TransportError::Closed) => {
                    self.mark_dead();
                    outcome.delivered = sent;
                    outcome.closed = true;
                    return outcome;
                }
            }
        }

        self.cache.clear();
        self.wants_writable = false;
        self.stats.events_delivered += sent as u64;
        outcome.delivered = sent;
        debug!(connection = %self.id, sent, "cache drained");

        outcome.merge(self.send_pending_flush_events(ctx));
        outcome
    }
}

/// Flag every wake-up event for acknowledgment and return how many were flagged
fn flag_wake_up_events(events: &mut [SensorEvent], registry: &SensorRegistry) -> u32 {
    let mut flagged = 0;
    for event in events.iter_mut() {
        if registry.is_wake_up(event.target_handle()) {
            event.needs_ack = true;
            flagged += 1;
        }
    }
    flagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;
    use contracts::{SensorDescriptor, SensorType};

    const ACCEL: SensorHandle = SensorHandle(1);
    const WAKE_ACCEL: SensorHandle = SensorHandle(2);
    const LIGHT: SensorHandle = SensorHandle(3);

    fn registry() -> SensorRegistry {
        let mut reg = SensorRegistry::new();
        reg.register_physical(
            SensorDescriptor::new(1, "accel", SensorType::Accelerometer).with_fifo(0, 8),
        )
        .unwrap();
        reg.register_physical(
            SensorDescriptor::new(2, "accel_wake", SensorType::Accelerometer)
                .with_wake_up(true)
                .with_fifo(4, 4),
        )
        .unwrap();
        reg.register_physical(SensorDescriptor::new(3, "light", SensorType::Light)).unwrap();
        reg
    }

    fn ctx(reg: &SensorRegistry) -> DeliveryContext<'_> {
        DeliveryContext {
            registry: reg,
            drain_chunk_events: 2,
            fallback_cache_events: 100,
        }
    }

    fn sample(handle: SensorHandle, ts: i64) -> SensorEvent {
        SensorEvent::sample(handle, SensorType::Accelerometer, ts, &[ts as f32])
    }

    fn connection(transport: &MockTransport) -> ClientConnection {
        ClientConnection::new(
            ConnectionId(1),
            ClientIdentity::new("com.test", 1),
            ConnectionMode::Normal,
            Box::new(transport.clone()),
        )
    }

    #[test]
    fn test_only_subscribed_events_forwarded() {
        let reg = registry();
        let transport = MockTransport::new();
        let mut conn = connection(&transport);
        conn.add_subscription(ACCEL);

        let batch = [sample(ACCEL, 1), sample(LIGHT, 2), sample(ACCEL, 3)];
        let outcome = conn.send(&batch, &[None; 3], &ctx(&reg));

        assert_eq!(outcome.delivered, 2);
        let written = transport.written_events();
        assert!(written.iter().all(|e| e.sensor == ACCEL));
    }

    #[test]
    fn test_first_flush_pending_swallows_until_resolved() {
        let reg = registry();
        let transport = MockTransport::new();
        let mut conn = connection(&transport);
        conn.add_subscription(ACCEL);
        conn.set_first_flush_pending(ACCEL, true);

        let batch = [
            sample(ACCEL, 1),
            SensorEvent::flush_complete(ACCEL, 2),
            sample(ACCEL, 3),
        ];
        let attribution = [None, Some(ConnectionId(1)), None];
        conn.send(&batch, &attribution, &ctx(&reg));

        let written = transport.written_events();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].timestamp, 3);
        assert!(!conn.flush_info(ACCEL).unwrap().first_flush_pending);
    }

    #[test]
    fn test_flush_marker_only_to_attributed_connection() {
        let reg = registry();
        let transport = MockTransport::new();
        let mut conn = connection(&transport);
        conn.add_subscription(ACCEL);

        let batch = [SensorEvent::flush_complete(ACCEL, 1)];
        conn.send(&batch, &[Some(ConnectionId(7))], &ctx(&reg));
        assert!(transport.written_events().is_empty());

        conn.send(&batch, &[None], &ctx(&reg));
        assert!(transport.written_events().is_empty());

        conn.send(&batch, &[Some(ConnectionId(1))], &ctx(&reg));
        assert_eq!(transport.written_events().len(), 1);
    }

    #[test]
    fn test_wake_up_events_flagged_and_counted() {
        let reg = registry();
        let transport = MockTransport::new();
        let mut conn = connection(&transport);
        conn.add_subscription(WAKE_ACCEL);
        conn.add_subscription(ACCEL);

        let batch = [sample(WAKE_ACCEL, 1), sample(ACCEL, 2), sample(WAKE_ACCEL, 3)];
        conn.send(&batch, &[None; 3], &ctx(&reg));

        assert_eq!(conn.wake_lock_ref_count(), 2);
        let flagged = transport
            .written_events()
            .iter()
            .filter(|e| e.needs_ack)
            .count();
        assert_eq!(flagged, 2);
    }

    #[test]
    fn test_would_block_caches_without_credit() {
        let reg = registry();
        let transport = MockTransport::new();
        let mut conn = connection(&transport);
        conn.add_subscription(WAKE_ACCEL);
        transport.set_blocked(true);

        let outcome = conn.send(&[sample(WAKE_ACCEL, 1)], &[None], &ctx(&reg));
        assert_eq!(outcome.cached, 1);
        assert!(outcome.newly_blocked);
        assert!(conn.wants_writable());
        assert_eq!(conn.wake_lock_ref_count(), 0);
        assert_eq!(conn.cache_len(), 1);
        // reserved FIFO of 4 on the only subscribed sensor
        assert_eq!(conn.max_cache_size(), 4);
    }

    #[test]
    fn test_cache_preserves_fifo_behind_backlog() {
        let reg = registry();
        let transport = MockTransport::new();
        let mut conn = connection(&transport);
        conn.add_subscription(ACCEL);

        transport.set_blocked(true);
        conn.send(&[sample(ACCEL, 1)], &[None], &ctx(&reg));
        transport.set_blocked(false);
        // Transport is writable again but the cache is not empty
        let outcome = conn.send(&[sample(ACCEL, 2)], &[None], &ctx(&reg));
        assert_eq!(outcome.delivered, 0);
        assert_eq!(conn.cache_len(), 2);

        conn.drain_cache(&ctx(&reg));
        let ts: Vec<i64> = transport.written_events().iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![1, 2]);
        assert!(!conn.wants_writable());
    }

    #[test]
    fn test_overflow_drops_oldest_and_compensates_flush() {
        let reg = registry();
        let transport = MockTransport::new();
        let mut conn = connection(&transport);
        conn.add_subscription(WAKE_ACCEL);
        transport.set_blocked(true);

        // max cache size is 4
        let first = [
            SensorEvent::flush_complete(WAKE_ACCEL, 1),
            sample(WAKE_ACCEL, 2),
            sample(WAKE_ACCEL, 3),
        ];
        conn.send(&first, &[Some(ConnectionId(1)), None, None], &ctx(&reg));
        assert_eq!(conn.cache_len(), 3);

        let second = [sample(WAKE_ACCEL, 4), sample(WAKE_ACCEL, 5)];
        let outcome = conn.send(&second, &[None, None], &ctx(&reg));
        assert_eq!(outcome.dropped, 1);
        assert_eq!(conn.cache_len(), 4);
        assert_eq!(conn.flush_info(WAKE_ACCEL).unwrap().pending_flush_count, 1);

        transport.set_blocked(false);
        let drained = conn.drain_cache(&ctx(&reg));
        assert_eq!(drained.flush_synthesized, 1);
        let written = transport.written_events();
        assert_eq!(written.len(), 5);
        assert!(written.last().unwrap().is_flush_complete());
        assert_eq!(conn.flush_info(WAKE_ACCEL).unwrap().pending_flush_count, 0);
    }

    #[test]
    fn test_partial_drain_keeps_tail() {
        let reg = registry();
        let transport = MockTransport::new();
        let mut conn = connection(&transport);
        conn.add_subscription(ACCEL);
        transport.set_blocked(true);
        let batch: Vec<SensorEvent> = (0..5).map(|ts| sample(ACCEL, ts)).collect();
        conn.send(&batch, &[None; 5], &ctx(&reg));
        assert_eq!(conn.cache_len(), 5);

        // chunks of 2: accept one chunk, then block
        transport.set_blocked(false);
        transport.block_after_writes(1);
        let outcome = conn.drain_cache(&ctx(&reg));
        assert_eq!(outcome.delivered, 2);
        assert_eq!(conn.cache_len(), 3);
        assert!(conn.wants_writable());

        transport.set_blocked(false);
        conn.drain_cache(&ctx(&reg));
        assert_eq!(conn.cache_len(), 0);
        let ts: Vec<i64> = transport.written_events().iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_closed_transport_marks_dead() {
        let reg = registry();
        let transport = MockTransport::new();
        let mut conn = connection(&transport);
        conn.add_subscription(WAKE_ACCEL);
        conn.send(&[sample(WAKE_ACCEL, 1)], &[None], &ctx(&reg));
        assert_eq!(conn.wake_lock_ref_count(), 1);

        transport.close();
        let outcome = conn.send(&[sample(WAKE_ACCEL, 2)], &[None], &ctx(&reg));
        assert!(outcome.closed);
        assert!(conn.is_dead());
        assert_eq!(conn.wake_lock_ref_count(), 0);
        assert!(!conn.needs_wake_lock());
    }

    #[test]
    fn test_apply_ack_clamps() {
        let reg = registry();
        let transport = MockTransport::new();
        let mut conn = connection(&transport);
        conn.add_subscription(WAKE_ACCEL);
        let batch: Vec<SensorEvent> = (0..3).map(|ts| sample(WAKE_ACCEL, ts)).collect();
        conn.send(&batch, &[None; 3], &ctx(&reg));
        assert_eq!(conn.wake_lock_ref_count(), 3);

        assert_eq!(conn.apply_ack(1), 2);
        // an ack of zero is treated as malformed
        assert_eq!(conn.apply_ack(0), 0);

        conn.send(&batch, &[None; 3], &ctx(&reg));
        // acking more than outstanding clears the count
        assert_eq!(conn.apply_ack(10), 0);
    }

    #[test]
    fn test_max_cache_size_tallies() {
        let reg = registry();
        let transport = MockTransport::new();
        let mut conn = connection(&transport);
        assert_eq!(conn.compute_max_cache_size(&ctx(&reg)), 100);

        conn.add_subscription(LIGHT);
        assert_eq!(conn.compute_max_cache_size(&ctx(&reg)), 100);

        conn.add_subscription(ACCEL);
        conn.add_subscription(WAKE_ACCEL);
        // shared 8 (non-wake) + reserved 4 (wake)
        assert_eq!(conn.compute_max_cache_size(&ctx(&reg)), 12);
    }
}
