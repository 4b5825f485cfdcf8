//! # Dispatcher
//!
//! 事件分发运行时。
//!
//! 负责：
//! - 在单个 task 中独占运行 `SensorEngine`，串行处理命令与批次
//! - 为每个客户端连接提供有界的事件队列（背压由 `WouldBlock` 触发）
//! - 唤醒锁看门狗
//!
//! ## Usage Example
//!
//! ```ignore
//! use dispatcher::{EngineRuntime, RuntimeOptions};
//!
//! let runtime = EngineRuntime::spawn(engine, RuntimeOptions::default())?;
//! let mut queue = runtime
//!     .handle()
//!     .create_connection(identity, ConnectionMode::Normal)
//!     .await?;
//! queue.enable(handle, Duration::from_millis(20), Duration::ZERO).await?;
//! while let Some(events) = queue.recv().await {
//!     queue.ack(events.iter().filter(|e| e.needs_ack).count() as u32).await?;
//! }
//! let report = runtime.shutdown().await?;
//! ```

mod command;
mod error;
mod handle;
mod metrics;
mod queue;
mod runtime;
mod transport;

pub use command::ModeRequest;
pub use error::RuntimeError;
pub use handle::EngineHandle;
pub use metrics::{MetricsSnapshot, RuntimeMetrics};
pub use queue::SensorEventQueue;
pub use runtime::{EngineRuntime, RuntimeOptions, RuntimeReport};
pub use transport::{ChannelTransport, ClientMessage};
