//! Active-sensor registry
//!
//! Per sensor handle: who is subscribed (and at what rate), and who is waiting
//! for a flush completion. The pending-flush queue is FIFO and is how a
//! device flush marker gets attributed to the connection that asked for it.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use contracts::{ConnectionId, SensorHandle};

/// Sampling configuration requested by one subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRequest {
    pub period: Duration,
    pub max_latency: Duration,
}

impl RateRequest {
    pub fn new(period: Duration, max_latency: Duration) -> Self {
        Self {
            period,
            max_latency,
        }
    }
}

/// Subscribers and pending flushes of one sensor
#[derive(Debug, Clone, Default)]
pub struct ActiveSensorRecord {
    subscribers: BTreeMap<ConnectionId, RateRequest>,
    pending_flush: VecDeque<ConnectionId>,
}

impl ActiveSensorRecord {
    /// Add or update a subscriber. Returns true if the connection is new.
    pub fn add_subscriber(&mut self, connection: ConnectionId, rate: RateRequest) -> bool {
        self.subscribers.insert(connection, rate).is_none()
    }

    /// Remove a subscriber and any flushes it was waiting for.
    /// Returns true if it was subscribed.
    pub fn remove_subscriber(&mut self, connection: ConnectionId) -> bool {
        self.pending_flush.retain(|c| *c != connection);
        self.subscribers.remove(&connection).is_some()
    }

    pub fn set_rate(&mut self, connection: ConnectionId, period: Duration) -> bool {
        match self.subscribers.get_mut(&connection) {
            Some(rate) => {
                rate.period = period;
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.subscribers.contains_key(&connection)
    }

    #[inline]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn subscribers(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.subscribers.keys().copied()
    }

    /// Fastest period and tightest latency across subscribers
    pub fn aggregated_rate(&self) -> Option<RateRequest> {
        let period = self.subscribers.values().map(|r| r.period).min()?;
        let max_latency = self.subscribers.values().map(|r| r.max_latency).min()?;
        Some(RateRequest {
            period,
            max_latency,
        })
    }

    pub fn push_pending_flush(&mut self, connection: ConnectionId) {
        self.pending_flush.push_back(connection);
    }

    /// Attribute the next flush marker for this sensor
    pub fn pop_pending_flush(&mut self) -> Option<ConnectionId> {
        self.pending_flush.pop_front()
    }

    /// Forget every outstanding flush, returning who was waiting
    pub fn clear_pending_flush(&mut self) -> Vec<ConnectionId> {
        self.pending_flush.drain(..).collect()
    }

    pub fn pending_flush_len(&self) -> usize {
        self.pending_flush.len()
    }
}

/// Map of handle to active record
#[derive(Debug, Default)]
pub struct ActiveSensors {
    records: BTreeMap<SensorHandle, ActiveSensorRecord>,
}

impl ActiveSensors {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, handle: SensorHandle) -> Option<&ActiveSensorRecord> {
        self.records.get(&handle)
    }

    #[inline]
    pub fn get_mut(&mut self, handle: SensorHandle) -> Option<&mut ActiveSensorRecord> {
        self.records.get_mut(&handle)
    }

    /// Get the record, creating it if absent. The flag is true if it was created.
    pub fn get_or_create(&mut self, handle: SensorHandle) -> (&mut ActiveSensorRecord, bool) {
        let created = !self.records.contains_key(&handle);
        (self.records.entry(handle).or_default(), created)
    }

    pub fn remove(&mut self, handle: SensorHandle) -> Option<ActiveSensorRecord> {
        self.records.remove(&handle)
    }

    pub fn handles(&self) -> Vec<SensorHandle> {
        self.records.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SensorHandle, &ActiveSensorRecord)> {
        self.records.iter().map(|(h, r)| (*h, r))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SensorHandle, &mut ActiveSensorRecord)> {
        self.records.iter_mut().map(|(h, r)| (*h, r))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(period_ms: u64, latency_ms: u64) -> RateRequest {
        RateRequest::new(
            Duration::from_millis(period_ms),
            Duration::from_millis(latency_ms),
        )
    }

    #[test]
    fn test_aggregated_rate_takes_minimums() {
        let mut record = ActiveSensorRecord::default();
        assert!(record.aggregated_rate().is_none());
        record.add_subscriber(ConnectionId(1), rate(20, 100));
        record.add_subscriber(ConnectionId(2), rate(50, 10));
        assert_eq!(record.aggregated_rate(), Some(rate(20, 10)));

        record.remove_subscriber(ConnectionId(1));
        assert_eq!(record.aggregated_rate(), Some(rate(50, 10)));
    }

    #[test]
    fn test_pending_flush_fifo() {
        let mut record = ActiveSensorRecord::default();
        record.push_pending_flush(ConnectionId(2));
        record.push_pending_flush(ConnectionId(1));
        assert_eq!(record.pop_pending_flush(), Some(ConnectionId(2)));
        assert_eq!(record.pop_pending_flush(), Some(ConnectionId(1)));
        assert_eq!(record.pop_pending_flush(), None);
    }

    #[test]
    fn test_remove_subscriber_drops_its_flushes() {
        let mut record = ActiveSensorRecord::default();
        record.add_subscriber(ConnectionId(1), rate(20, 0));
        record.add_subscriber(ConnectionId(2), rate(20, 0));
        record.push_pending_flush(ConnectionId(1));
        record.push_pending_flush(ConnectionId(2));
        record.push_pending_flush(ConnectionId(1));

        assert!(record.remove_subscriber(ConnectionId(1)));
        assert!(!record.remove_subscriber(ConnectionId(1)));
        assert_eq!(record.pending_flush_len(), 1);
        assert_eq!(record.pop_pending_flush(), Some(ConnectionId(2)));
    }

    #[test]
    fn test_get_or_create() {
        let mut active = ActiveSensors::new();
        let (_, created) = active.get_or_create(SensorHandle(1));
        assert!(created);
        let (_, created) = active.get_or_create(SensorHandle(1));
        assert!(!created);
        assert_eq!(active.len(), 1);
    }
}
