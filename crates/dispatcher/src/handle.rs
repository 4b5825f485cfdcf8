//! EngineHandle - cloneable front door of the engine task

use std::time::Duration;

use contracts::{
    ClientIdentity, ConnectionId, ConnectionMode, EngineError, SensorDescriptor, SensorHandle,
};
use sensor_engine::EngineStatus;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::command::{Command, ModeRequest, Reply};
use crate::queue::SensorEventQueue;

/// Handle to a running engine
///
/// Every call is one round trip through the engine's command queue. Once the
/// engine task is gone every call returns [`EngineError::ShuttingDown`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl EngineHandle {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| EngineError::ShuttingDown)?;
        rx.await.map_err(|_| EngineError::ShuttingDown)?
    }

    /// Open a connection and return its event queue
    pub async fn create_connection(
        &self,
        identity: ClientIdentity,
        mode: ConnectionMode,
    ) -> Result<SensorEventQueue, EngineError> {
        self.request(|reply| Command::CreateConnection {
            identity,
            mode,
            reply,
        })
        .await
    }

    pub async fn close_connection(&self, connection: ConnectionId) -> Result<(), EngineError> {
        self.request(|reply| Command::CloseConnection { connection, reply })
            .await
    }

    pub async fn enable(
        &self,
        connection: ConnectionId,
        handle: SensorHandle,
        period: Duration,
        max_latency: Duration,
    ) -> Result<(), EngineError> {
        self.request(|reply| Command::Enable {
            connection,
            handle,
            period,
            max_latency,
            reply,
        })
        .await
    }

    pub async fn disable(
        &self,
        connection: ConnectionId,
        handle: SensorHandle,
    ) -> Result<(), EngineError> {
        self.request(|reply| Command::Disable {
            connection,
            handle,
            reply,
        })
        .await
    }

    pub async fn set_rate(
        &self,
        connection: ConnectionId,
        handle: SensorHandle,
        period: Duration,
    ) -> Result<(), EngineError> {
        self.request(|reply| Command::SetRate {
            connection,
            handle,
            period,
            reply,
        })
        .await
    }

    pub async fn flush(&self, connection: ConnectionId) -> Result<(), EngineError> {
        self.request(|reply| Command::Flush { connection, reply })
            .await
    }

    /// Enter restricted mode for `package`
    pub async fn enter_restricted(&self, package: impl Into<String>) -> Result<(), EngineError> {
        self.set_mode(ModeRequest::Restricted(package.into())).await
    }

    /// Enter data-injection mode for `package`
    pub async fn enter_data_injection(
        &self,
        package: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.set_mode(ModeRequest::DataInjection(package.into()))
            .await
    }

    pub async fn exit_to_normal(&self) -> Result<(), EngineError> {
        self.set_mode(ModeRequest::Normal).await
    }

    pub async fn set_mode(&self, request: ModeRequest) -> Result<(), EngineError> {
        self.request(|reply| Command::SetMode { request, reply })
            .await
    }

    /// Sensors visible to `identity`
    pub async fn sensor_list(
        &self,
        identity: ClientIdentity,
    ) -> Result<Vec<SensorDescriptor>, EngineError> {
        self.request(|reply| Command::SensorList { identity, reply })
            .await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Ask the engine task to stop. Returns once the request was accepted.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        debug!("shutdown requested");
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
