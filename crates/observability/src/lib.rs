//! # Observability
//!
//! 可观测性模块：Tracing 日志 + Prometheus 指标。
//!
//! - `init_with_config`：安装 tracing subscriber（JSON / Pretty / Compact），
//!   可选同时启动 Prometheus 导出
//! - `init_metrics_only`：仅启动 Prometheus 导出（`run --metrics-port`）
//! - `record_*`：引擎与运行时调用的领域指标
//! - `DispatchMetricsAggregator`：进程内汇总，供 CLI 打印
//!
//! ```ignore
//! observability::init_with_config(ObservabilityConfig {
//!     log_format: LogFormat::Compact,
//!     ..Default::default()
//! })?;
//! let report = engine.process_batch(&mut batch);
//! observability::record_batch_metrics(&report);
//! ```

pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub use crate::metrics::{
    describe_metrics, record_active_connections, record_active_sensors, record_batch_metrics,
    record_cache_dropped, record_command, record_flush_synthesized, record_mode_transition,
    record_wake_lock_held, record_wake_lock_watchdog_release, DispatchMetricsAggregator,
    MetricsSummary, RunningStats, StatsSummary,
};

/// 可观测性配置
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Prometheus 端口 (None = 禁用)
    pub metrics_port: Option<u16>,
    /// `RUST_LOG` 未设置时使用的过滤规则
    pub default_log_level: String,
    /// 记录 `#[instrument]` span 关闭事件（含耗时）
    pub span_timing: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            metrics_port: None,
            default_log_level: "info".to_string(),
            span_timing: false,
        }
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON 结构化日志
    #[default]
    Json,
    /// 人类可读格式
    Pretty,
    /// 紧凑单行格式
    Compact,
}

/// 安装全局 tracing subscriber，可选启动指标导出
///
/// # Errors
/// subscriber 已安装，或 Prometheus 端口无法监听。
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_log_level));
    let span_events = if config.span_timing {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true)
            .with_span_events(span_events)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_span_events(span_events).boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_span_events(span_events)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(port) = config.metrics_port {
        install_prometheus(port)?;
    }

    tracing::debug!(
        log_format = ?config.log_format,
        metrics_port = ?config.metrics_port,
        span_timing = config.span_timing,
        "observability initialized"
    );
    Ok(())
}

/// 仅启动 Prometheus 导出，tracing 由调用方负责
pub fn init_metrics_only(port: u16) -> Result<()> {
    install_prometheus(port)
}

fn install_prometheus(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .add_global_label("service", "sensorhub")
        .install()
        .with_context(|| format!("Failed to install Prometheus recorder on port {port}"))?;
    describe_metrics();

    tracing::info!(port, "Prometheus metrics endpoint initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.default_log_level, "info");
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(!config.span_timing);
    }

    #[test]
    fn test_recorders_without_exporter() {
        // no recorder installed: every call is a no-op
        describe_metrics();
        record_wake_lock_held(true);
        record_command("enable", false);
        record_mode_transition("restricted");
    }
}
