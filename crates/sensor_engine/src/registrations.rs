//! Recent enable/disable registrations, kept for diagnostics

use std::time::Duration;

use chrono::{DateTime, Utc};
use contracts::SensorHandle;
use ringbuf::{traits::*, HeapRb};
use serde::Serialize;

/// Entries kept in the log
pub const REGISTRATION_LOG_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationRecord {
    pub handle: SensorHandle,
    pub package: String,
    #[serde(with = "duration_us")]
    pub period: Duration,
    #[serde(with = "duration_us")]
    pub max_latency: Duration,
    /// true for enable, false for disable
    pub activated: bool,
    pub at: DateTime<Utc>,
}

mod duration_us {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros() as u64)
    }
}

pub struct RegistrationLog {
    ring: HeapRb<RegistrationRecord>,
}

impl Default for RegistrationLog {
    fn default() -> Self {
        Self {
            ring: HeapRb::new(REGISTRATION_LOG_SIZE),
        }
    }
}

impl std::fmt::Debug for RegistrationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationLog")
            .field("len", &self.ring.occupied_len())
            .finish()
    }
}

impl RegistrationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enable(
        &mut self,
        handle: SensorHandle,
        package: &str,
        period: Duration,
        max_latency: Duration,
    ) {
        self.push(RegistrationRecord {
            handle,
            package: package.to_string(),
            period,
            max_latency,
            activated: true,
            at: Utc::now(),
        });
    }

    pub fn record_disable(&mut self, handle: SensorHandle, package: &str) {
        self.push(RegistrationRecord {
            handle,
            package: package.to_string(),
            period: Duration::ZERO,
            max_latency: Duration::ZERO,
            activated: false,
            at: Utc::now(),
        });
    }

    fn push(&mut self, record: RegistrationRecord) {
        if self.ring.is_full() {
            let _ = self.ring.try_pop();
        }
        let _ = self.ring.try_push(record);
    }

    /// Newest first
    pub fn recent(&self) -> Vec<RegistrationRecord> {
        let mut records: Vec<_> = self.ring.iter().cloned().collect();
        records.reverse();
        records
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
