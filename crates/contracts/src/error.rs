//! Layered error definitions
//!
//! Categorized by source: config / engine / device / transport

use thiserror::Error;

use crate::{ConnectionId, SensorHandle};

/// Unified configuration and I/O error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors returned by engine operations.
///
/// Handle, permission and mode errors are returned synchronously and leave
/// shared state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The sensor handle is unknown, or not subscribed on this connection
    #[error("invalid sensor handle {handle}")]
    InvalidHandle { handle: SensorHandle },

    /// The connection id does not name a live connection
    #[error("unknown connection {connection}")]
    UnknownConnection { connection: ConnectionId },

    /// The caller lacks the permission required by the sensor or the current mode
    #[error("permission denied for '{package}': {reason}")]
    PermissionDenied { package: String, reason: String },

    /// The requested operating-mode transition or mode-gated action is not allowed
    #[error("invalid operating mode: {message}")]
    InvalidOperatingMode { message: String },

    /// The operation is not supported for this sensor
    #[error("invalid operation on sensor {handle}: {message}")]
    InvalidOperation {
        handle: SensorHandle,
        message: String,
    },

    /// A request argument is out of range
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The sensor device reported a failure
    #[error("device failure: {0}")]
    DeviceFailure(#[from] DeviceError),

    /// A client transport failed
    #[error("transport failure on connection {connection}: {source}")]
    TransportFailure {
        connection: ConnectionId,
        #[source]
        source: TransportError,
    },

    /// A bounded resource ran out of room
    #[error("resource exhausted: {message}")]
    ResourceExhausted { message: String },

    /// The engine task is gone
    #[error("engine is shutting down")]
    ShuttingDown,
}

impl EngineError {
    /// Create a permission error
    pub fn permission_denied(package: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            package: package.into(),
            reason: reason.into(),
        }
    }

    /// Create an operating-mode error
    pub fn invalid_mode(message: impl Into<String>) -> Self {
        Self::InvalidOperatingMode {
            message: message.into(),
        }
    }

    /// Create an invalid-operation error
    pub fn invalid_operation(handle: SensorHandle, message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            handle,
            message: message.into(),
        }
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

/// Errors reported by a [`SensorDevice`](crate::SensorDevice)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The device does not implement this request
    #[error("operation not supported by device")]
    Unsupported,

    /// The device rejected the handle
    #[error("device does not know sensor {0}")]
    UnknownSensor(SensorHandle),

    /// The device has been disconnected or shut down
    #[error("device disconnected")]
    Disconnected,

    /// Device-level I/O failure
    #[error("device io error: {0}")]
    Io(String),
}

/// Errors reported by an [`EventTransport`](crate::EventTransport)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer cannot accept more data right now
    #[error("transport would block")]
    WouldBlock,

    /// The peer has gone away
    #[error("transport closed")]
    Closed,
}

/// Returned when pushing into a full [`EventBuffer`](crate::EventBuffer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event buffer full (capacity {capacity})")]
pub struct BufferFull {
    pub capacity: usize,
}

/// Returned by a fusion sink that could not consume an event
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fusion error: {0}")]
pub struct FusionError(pub String);
