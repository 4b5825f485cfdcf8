//! In-process client transport over a bounded tokio channel

use contracts::{EventTransport, SensorEvent, TransportError, WritableFuture};
use tokio::sync::mpsc;

/// Messages a client sends back to the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClientMessage {
    /// The client handled `n` wake-up events
    Ack(u32),
    /// Data-injection connections only
    Inject(SensorEvent),
}

/// Engine side of a client connection. Each write is one channel slot; a
/// full channel is reported as `WouldBlock`.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Vec<SensorEvent>>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::Sender<Vec<SensorEvent>>) -> Self {
        Self { tx }
    }

    /// Create a transport and the client's receiving end
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<Vec<SensorEvent>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl EventTransport for ChannelTransport {
    fn try_write(&mut self, events: &[SensorEvent]) -> Result<usize, TransportError> {
        match self.tx.try_send(events.to_vec()) {
            Ok(()) => Ok(events.len()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(TransportError::WouldBlock),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    fn writable(&self) -> WritableFuture {
        let tx = self.tx.clone();
        Box::pin(async move {
            // the permit is released right away; this only waits for room
            tx.reserve()
                .await
                .map(drop)
                .map_err(|_| TransportError::Closed)
        })
    }
}
