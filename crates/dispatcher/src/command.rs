//! Requests accepted by the engine task

use std::time::Duration;

use contracts::{
    ClientIdentity, ConnectionId, ConnectionMode, EngineError, SensorDescriptor, SensorHandle,
};
use sensor_engine::EngineStatus;
use tokio::sync::oneshot;

use crate::queue::SensorEventQueue;
use crate::transport::ClientMessage;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Operating mode transition requested through [`EngineHandle`](crate::EngineHandle)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeRequest {
    Normal,
    Restricted(String),
    DataInjection(String),
}

/// One unit of work for the engine task. Every state change goes through here.
pub(crate) enum Command {
    CreateConnection {
        identity: ClientIdentity,
        mode: ConnectionMode,
        reply: Reply<SensorEventQueue>,
    },
    CloseConnection {
        connection: ConnectionId,
        reply: Reply<()>,
    },
    Enable {
        connection: ConnectionId,
        handle: SensorHandle,
        period: Duration,
        max_latency: Duration,
        reply: Reply<()>,
    },
    Disable {
        connection: ConnectionId,
        handle: SensorHandle,
        reply: Reply<()>,
    },
    SetRate {
        connection: ConnectionId,
        handle: SensorHandle,
        period: Duration,
        reply: Reply<()>,
    },
    Flush {
        connection: ConnectionId,
        reply: Reply<()>,
    },
    SetMode {
        request: ModeRequest,
        reply: Reply<()>,
    },
    SensorList {
        identity: ClientIdentity,
        reply: Reply<Vec<SensorDescriptor>>,
    },
    Status {
        reply: Reply<EngineStatus>,
    },
    /// Ack or injection read from a client
    Client {
        connection: ConnectionId,
        message: ClientMessage,
    },
    Hangup {
        connection: ConnectionId,
    },
    Writable {
        connection: ConnectionId,
    },
    WatchdogTick,
    Shutdown {
        reply: Reply<()>,
    },
}

impl Command {
    /// Label used for metrics
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::CreateConnection { .. } => "create_connection",
            Self::CloseConnection { .. } => "close_connection",
            Self::Enable { .. } => "enable",
            Self::Disable { .. } => "disable",
            Self::SetRate { .. } => "set_rate",
            Self::Flush { .. } => "flush",
            Self::SetMode { .. } => "set_mode",
            Self::SensorList { .. } => "sensor_list",
            Self::Status { .. } => "status",
            Self::Client {
                message: ClientMessage::Ack(_),
                ..
            } => "ack",
            Self::Client {
                message: ClientMessage::Inject(_),
                ..
            } => "inject",
            Self::Hangup { .. } => "hangup",
            Self::Writable { .. } => "writable",
            Self::WatchdogTick => "watchdog_tick",
            Self::Shutdown { .. } => "shutdown",
        }
    }
}
