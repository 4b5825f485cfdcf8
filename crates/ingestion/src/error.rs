//! Ingestion 错误类型

use contracts::DeviceError;
use thiserror::Error;

/// Ingestion 错误
#[derive(Debug, Error)]
pub enum IngestionError {
    /// 设备读取失败（致命）
    #[error("device poll failed: {0}")]
    Device(#[from] DeviceError),

    /// 轮询配置非法
    #[error("invalid poll configuration: {message}")]
    InvalidConfig {
        /// 错误消息
        message: String,
    },
}

impl IngestionError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
