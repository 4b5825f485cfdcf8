//! Client-facing collaborators: event transport and wake lock

use std::future::Future;
use std::pin::Pin;

use crate::{SensorEvent, TransportError};

/// Future resolving once a transport can accept another write
pub type WritableFuture = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send>>;

/// Outbound half of a client connection.
///
/// Writes never block. A write either takes every event or none of them.
pub trait EventTransport: Send {
    /// Try to hand `events` to the client.
    ///
    /// # Errors
    /// - [`TransportError::WouldBlock`]: nothing was written, retry later
    /// - [`TransportError::Closed`]: the client is gone
    fn try_write(&mut self, events: &[SensorEvent]) -> Result<usize, TransportError>;

    /// Readiness registration: resolves when the next write may succeed
    fn writable(&self) -> WritableFuture;
}

/// Process-wide wake lock primitive.
///
/// Not reference counted; the caller only invokes it on held-state
/// transitions.
pub trait WakeLockPrimitive: Send {
    fn acquire(&self, name: &str);
    fn release(&self, name: &str);
}
