//! Dispatch 指标收集模块
//!
//! 基于 BatchReport 收集和统计分发引擎的运行指标。

use contracts::BatchReport;
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};

/// 为 Prometheus 导出注册指标说明
///
/// 在安装 recorder 之后调用一次；未安装 recorder 时为空操作。
pub fn describe_metrics() {
    describe_counter!("sensorhub_batches_total", "Polled batches run through the engine");
    describe_histogram!("sensorhub_batch_size", "Events per batch after synthesis");
    describe_counter!("sensorhub_events_polled_total", "Raw events read from the device");
    describe_counter!(
        "sensorhub_events_synthesized_total",
        "Events produced by virtual sensors"
    );
    describe_counter!(
        "sensorhub_events_dispatched_total",
        "Events written to client transports"
    );
    describe_counter!(
        "sensorhub_events_cached_total",
        "Events parked in a client cache after backpressure"
    );
    describe_counter!(
        "sensorhub_cache_dropped_total",
        "Events discarded because a client cache was full"
    );
    describe_counter!(
        "sensorhub_flush_synthesized_total",
        "Flush-complete markers generated by the engine"
    );
    describe_gauge!("sensorhub_wake_lock_held", "1 while the wake lock is held");
    describe_counter!(
        "sensorhub_wake_lock_watchdog_releases_total",
        "Wake locks force-released by the watchdog"
    );
    describe_gauge!("sensorhub_active_connections", "Open client connections");
    describe_gauge!("sensorhub_active_sensors", "Sensors with at least one subscriber");
    describe_counter!("sensorhub_mode_transitions_total", "Operating mode changes");
    describe_counter!("sensorhub_commands_total", "Engine commands handled");
}

/// 从 BatchReport 记录指标
///
/// 每处理完一个批次调用一次。
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_batch_metrics;
///
/// let report = engine.process_batch(&mut buffer);
/// record_batch_metrics(&report);
/// ```
pub fn record_batch_metrics(report: &BatchReport) {
    // 批次计数器
    counter!("sensorhub_batches_total").increment(1);
    gauge!("sensorhub_last_batch_id").set(report.batch_id as f64);

    // 批次大小
    histogram!("sensorhub_batch_size").record(report.batch_size() as f64);
    counter!("sensorhub_events_polled_total").increment(report.polled as u64);
    if report.synthesized > 0 {
        counter!("sensorhub_events_synthesized_total").increment(report.synthesized as u64);
    }

    // 分发结果
    counter!("sensorhub_events_dispatched_total").increment(report.delivered as u64);
    if report.cached > 0 {
        counter!("sensorhub_events_cached_total").increment(report.cached as u64);
    }
    if report.dropped > 0 {
        counter!("sensorhub_cache_dropped_total").increment(report.dropped as u64);
    }

    // flush
    if report.flush_markers > 0 {
        counter!("sensorhub_flush_markers_total").increment(report.flush_markers as u64);
    }
    if report.unattributed_flushes > 0 {
        counter!("sensorhub_flush_unattributed_total")
            .increment(report.unattributed_flushes as u64);
    }
    if report.flush_synthesized > 0 {
        counter!("sensorhub_flush_synthesized_total").increment(report.flush_synthesized as u64);
    }

    if report.one_shot_disabled > 0 {
        counter!("sensorhub_one_shot_disabled_total").increment(report.one_shot_disabled as u64);
    }

    gauge!("sensorhub_batch_fanout").set(report.connections as f64);
    record_wake_lock_held(report.wake_lock_held);
}

/// 记录唤醒锁状态
pub fn record_wake_lock_held(held: bool) {
    gauge!("sensorhub_wake_lock_held").set(if held { 1.0 } else { 0.0 });
}

/// 记录看门狗强制释放唤醒锁
pub fn record_wake_lock_watchdog_release() {
    counter!("sensorhub_wake_lock_watchdog_releases_total").increment(1);
}

/// 记录活跃连接数
pub fn record_active_connections(count: usize) {
    gauge!("sensorhub_active_connections").set(count as f64);
}

/// 记录活跃传感器数
pub fn record_active_sensors(count: usize) {
    gauge!("sensorhub_active_sensors").set(count as f64);
}

/// 记录非批次路径上的缓存丢弃 (如回填最新值)
pub fn record_cache_dropped(count: usize) {
    if count > 0 {
        counter!("sensorhub_cache_dropped_total").increment(count as u64);
    }
}

/// 记录非批次路径上合成的 flush 完成事件
pub fn record_flush_synthesized(count: usize) {
    if count > 0 {
        counter!("sensorhub_flush_synthesized_total").increment(count as u64);
    }
}

/// 记录工作模式切换
pub fn record_mode_transition(mode: &str) {
    counter!(
        "sensorhub_mode_transitions_total",
        "mode" => mode.to_string()
    )
    .increment(1);
}

/// 记录客户端命令处理
pub fn record_command(command: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "sensorhub_commands_total",
        "command" => command.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 分发指标聚合器
///
/// 在内存中聚合指标，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct DispatchMetricsAggregator {
    /// 总批次数
    pub total_batches: u64,

    /// 设备读出的事件总数
    pub total_polled: u64,

    /// 虚拟传感器合成的事件总数
    pub total_synthesized: u64,

    /// 写入客户端的事件总数
    pub total_delivered: u64,

    /// 进入连接缓存的事件总数
    pub total_cached: u64,

    /// 缓存溢出丢弃总数
    pub total_dropped: u64,

    /// 合成的 flush 完成事件总数
    pub total_flush_synthesized: u64,

    /// 批次大小统计
    pub batch_size_stats: RunningStats,

    /// 每批次扇出连接数统计
    pub fanout_stats: RunningStats,
}

impl DispatchMetricsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, report: &BatchReport) {
        self.total_batches += 1;
        self.total_polled += report.polled as u64;
        self.total_synthesized += report.synthesized as u64;
        self.total_delivered += report.delivered as u64;
        self.total_cached += report.cached as u64;
        self.total_dropped += report.dropped as u64;
        self.total_flush_synthesized += report.flush_synthesized as u64;

        self.batch_size_stats.push(report.batch_size() as f64);
        self.fanout_stats.push(report.connections as f64);
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        let offered = self.total_delivered + self.total_cached;
        MetricsSummary {
            total_batches: self.total_batches,
            total_polled: self.total_polled,
            total_synthesized: self.total_synthesized,
            total_delivered: self.total_delivered,
            total_cached: self.total_cached,
            total_dropped: self.total_dropped,
            total_flush_synthesized: self.total_flush_synthesized,
            drop_rate: if offered > 0 {
                self.total_dropped as f64 / offered as f64 * 100.0
            } else {
                0.0
            },
            batch_size: StatsSummary::from(&self.batch_size_stats),
            fanout: StatsSummary::from(&self.fanout_stats),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_batches: u64,
    pub total_polled: u64,
    pub total_synthesized: u64,
    pub total_delivered: u64,
    pub total_cached: u64,
    pub total_dropped: u64,
    pub total_flush_synthesized: u64,
    pub drop_rate: f64,
    pub batch_size: StatsSummary,
    pub fanout: StatsSummary,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Dispatch Metrics Summary ===")?;
        writeln!(f, "Total batches: {}", self.total_batches)?;
        writeln!(
            f,
            "Events polled: {} (+{} synthesized)",
            self.total_polled, self.total_synthesized
        )?;
        writeln!(f, "Events delivered: {}", self.total_delivered)?;
        writeln!(f, "Events cached: {}", self.total_cached)?;
        writeln!(
            f,
            "Events dropped: {} ({:.2}%)",
            self.total_dropped, self.drop_rate
        )?;
        writeln!(f, "Flush completions synthesized: {}", self.total_flush_synthesized)?;
        writeln!(f, "Batch size: {}", self.batch_size)?;
        writeln!(f, "Fan-out: {}", self.fanout)?;
        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.2}, std={:.2} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
