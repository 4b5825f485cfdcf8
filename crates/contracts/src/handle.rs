//! Stable identifiers for sensors and client connections.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable integer identifying one physical or virtual sensor.
///
/// # Examples
/// ```
/// use contracts::SensorHandle;
///
/// let handle = SensorHandle::from(7);
/// assert_eq!(handle.get(), 7);
/// assert_eq!(handle.to_string(), "#7");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SensorHandle(pub i32);

impl SensorHandle {
    /// Raw handle value
    #[inline]
    pub fn get(self) -> i32 {
        self.0
    }
}

impl From<i32> for SensorHandle {
    #[inline]
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for SensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a client connection.
///
/// Ids are never reused for the lifetime of an engine, so a stale id can only
/// ever resolve to "unknown connection".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
