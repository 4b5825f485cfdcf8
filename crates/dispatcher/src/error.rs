//! Runtime error types

use contracts::EngineError;
use ingestion::IngestionError;
use thiserror::Error;

/// Errors that end the engine runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The device poll loop failed; the engine stops
    #[error("ingestion failed: {0}")]
    Ingestion(#[from] IngestionError),

    /// Engine construction or teardown error
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// A runtime task panicked or was cancelled
    #[error("runtime task '{task}' failed: {message}")]
    TaskFailed { task: String, message: String },
}

impl RuntimeError {
    /// Create a task failure error
    pub fn task_failed(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TaskFailed {
            task: task.into(),
            message: message.into(),
        }
    }

    /// Whether the device is the cause
    pub fn is_device_failure(&self) -> bool {
        matches!(self, Self::Ingestion(IngestionError::Device(_)))
    }
}
