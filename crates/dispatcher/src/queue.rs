//! SensorEventQueue - client end of a connection

use std::time::Duration;

use contracts::{ConnectionId, EngineError, SensorEvent, SensorHandle};
use tokio::sync::mpsc;

use crate::handle::EngineHandle;
use crate::transport::ClientMessage;

/// A client's connection to the engine
///
/// Events arrive in chunks exactly as the engine wrote them. Dropping the
/// queue hangs the connection up, which releases its subscriptions and its
/// share of the wake lock.
#[derive(Debug)]
pub struct SensorEventQueue {
    id: ConnectionId,
    engine: EngineHandle,
    events: mpsc::Receiver<Vec<SensorEvent>>,
    messages: mpsc::Sender<ClientMessage>,
}

impl SensorEventQueue {
    pub(crate) fn new(
        id: ConnectionId,
        engine: EngineHandle,
        events: mpsc::Receiver<Vec<SensorEvent>>,
        messages: mpsc::Sender<ClientMessage>,
    ) -> Self {
        Self {
            id,
            engine,
            events,
            messages,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Next chunk of events, `None` once the engine closed the connection
    pub async fn recv(&mut self) -> Option<Vec<SensorEvent>> {
        self.events.recv().await
    }

    /// Next chunk if one is ready
    pub fn try_recv(&mut self) -> Option<Vec<SensorEvent>> {
        self.events.try_recv().ok()
    }

    /// Acknowledge `count` handled wake-up events
    pub async fn ack(&self, count: u32) -> Result<(), EngineError> {
        if count == 0 {
            return Ok(());
        }
        self.messages
            .send(ClientMessage::Ack(count))
            .await
            .map_err(|_| EngineError::ShuttingDown)
    }

    /// Push an event into the device. Only meaningful on a data-injection
    /// connection while the engine is in data-injection mode; errors are
    /// logged by the engine.
    pub async fn inject(&self, event: SensorEvent) -> Result<(), EngineError> {
        self.messages
            .send(ClientMessage::Inject(event))
            .await
            .map_err(|_| EngineError::ShuttingDown)
    }

    pub async fn enable(
        &self,
        handle: SensorHandle,
        period: Duration,
        max_latency: Duration,
    ) -> Result<(), EngineError> {
        self.engine
            .enable(self.id, handle, period, max_latency)
            .await
    }

    pub async fn disable(&self, handle: SensorHandle) -> Result<(), EngineError> {
        self.engine.disable(self.id, handle).await
    }

    pub async fn set_rate(&self, handle: SensorHandle, period: Duration) -> Result<(), EngineError> {
        self.engine.set_rate(self.id, handle, period).await
    }

    pub async fn flush(&self) -> Result<(), EngineError> {
        self.engine.flush(self.id).await
    }

    /// Close the connection explicitly and wait for the engine to forget it
    pub async fn close(self) -> Result<(), EngineError> {
        self.engine.close_connection(self.id).await
    }
}
