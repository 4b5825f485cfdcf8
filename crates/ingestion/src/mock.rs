//! Mock 传感器设备
//!
//! 无硬件环境下的 `SensorDevice` 实现：按采样率生成模拟数据，
//! 支持 FIFO 批处理延迟、flush 标记、数据注入模式和故障注入。

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use contracts::{
    DeviceError, DeviceMode, EngineBlueprint, EventBuffer, SensorDescriptor, SensorDevice,
    SensorEvent, SensorHandle, SensorType,
};
use tracing::{debug, trace};

/// Longest a single `poll` blocks without events
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Samples generated per sensor per poll when the poller falls behind
const MAX_CATCH_UP: usize = 256;

/// Mock 传感器配置
#[derive(Debug, Clone)]
pub struct MockSensorConfig {
    /// 传感器描述
    pub descriptor: SensorDescriptor,

    /// 生成频率上限 (Hz)
    pub rate_hz: f64,

    /// 是否支持 flush
    pub flush_supported: bool,
}

impl MockSensorConfig {
    pub fn new(descriptor: SensorDescriptor, rate_hz: f64) -> Self {
        Self {
            descriptor,
            rate_hz,
            flush_supported: true,
        }
    }

    /// Flush requests report `Unsupported`
    pub fn without_flush(mut self) -> Self {
        self.flush_supported = false;
        self
    }

    fn native_period(&self) -> Duration {
        if self.rate_hz > 0.0 {
            Duration::from_secs_f64(1.0 / self.rate_hz)
        } else {
            Duration::from_secs(1)
        }
    }
}

/// One simulated sensor
#[derive(Debug)]
struct SimSensor {
    config: MockSensorConfig,
    active: bool,
    period: Duration,
    max_latency: Duration,
    next_due: Option<Instant>,
    fifo: VecDeque<SensorEvent>,
    fifo_since: Option<Instant>,
    pending_flushes: u32,
    seq: u64,
}

impl SimSensor {
    fn new(config: MockSensorConfig) -> Self {
        let period = config.native_period();
        Self {
            config,
            active: false,
            period,
            max_latency: Duration::ZERO,
            next_due: None,
            fifo: VecDeque::new(),
            fifo_since: None,
            pending_flushes: 0,
            seq: 0,
        }
    }

    fn handle(&self) -> SensorHandle {
        self.config.descriptor.handle
    }

    fn effective_period(&self) -> Duration {
        self.period.max(self.config.native_period())
    }

    fn batching(&self) -> bool {
        !self.max_latency.is_zero() && self.config.descriptor.fifo_max_events > 0
    }

    /// Synthetic sample for the sensor's type
    fn generate(&mut self, timestamp: i64) -> SensorEvent {
        self.seq += 1;
        let desc = &self.config.descriptor;
        let t = timestamp as f64 / 1e9;
        let values: [f32; 3] = match desc.sensor_type {
            SensorType::Accelerometer => [
                (0.3 * t.sin()) as f32,
                (0.3 * t.cos()) as f32,
                (9.81 + 0.05 * (3.0 * t).sin()) as f32,
            ],
            SensorType::Gyroscope => [(0.01 * t.sin()) as f32, 0.0, (0.01 * t.cos()) as f32],
            SensorType::MagneticField => [22.0, -5.0, -40.0],
            SensorType::Light => [(100.0 + 50.0 * (t / 5.0).sin()).round() as f32, 0.0, 0.0],
            SensorType::Pressure => [1013.25, 0.0, 0.0],
            SensorType::Proximity => [if (t as u64 / 2) % 2 == 0 { 5.0 } else { 0.0 }, 0.0, 0.0],
            SensorType::HeartRate => [(70.0 + 5.0 * (t / 3.0).sin()).round() as f32, 0.0, 0.0],
            SensorType::StepCounter => {
                return SensorEvent::step_count(desc.handle, timestamp, self.seq);
            }
            SensorType::StepDetector | SensorType::SignificantMotion => [1.0, 0.0, 0.0],
            _ => [0.0, 0.0, 0.0],
        };
        SensorEvent::sample(desc.handle, desc.sensor_type, timestamp, &values)
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    sensors: BTreeMap<SensorHandle, SimSensor>,
    ready: VecDeque<SensorEvent>,
    injected: VecDeque<SensorEvent>,
    mode: DeviceMode,
    fail_next_poll: Option<DeviceError>,
    closed: bool,
}

impl DeviceState {
    fn sensor_mut(&mut self, handle: SensorHandle) -> Result<&mut SimSensor, DeviceError> {
        self.sensors
            .get_mut(&handle)
            .ok_or(DeviceError::UnknownSensor(handle))
    }

    /// Generate due samples and move releasable FIFO contents to the ready queue
    fn advance(&mut self, now: Instant, epoch: Instant) {
        let ready = &mut self.ready;
        for sensor in self.sensors.values_mut() {
            if let Some(mut due) = sensor.next_due {
                let period = sensor.effective_period();
                let mut produced = 0;
                while due <= now && produced < MAX_CATCH_UP {
                    let ts = due.saturating_duration_since(epoch).as_nanos() as i64;
                    let event = sensor.generate(ts);
                    sensor.fifo.push_back(event);
                    sensor.fifo_since.get_or_insert(due);
                    due += period;
                    produced += 1;
                    if sensor.config.descriptor.is_one_shot() {
                        // one-shot sensors disarm themselves after firing
                        sensor.active = false;
                        break;
                    }
                }
                if due <= now {
                    due = now + period;
                }
                sensor.next_due = sensor.active.then_some(due);
            }

            let full = sensor.fifo.len() >= sensor.config.descriptor.fifo_max_events as usize;
            let expired = sensor
                .fifo_since
                .is_some_and(|since| now.duration_since(since) >= sensor.max_latency);
            if !sensor.fifo.is_empty()
                && (!sensor.batching() || full || expired || sensor.pending_flushes > 0)
            {
                ready.extend(sensor.fifo.drain(..));
                sensor.fifo_since = None;
            }

            let ts = now.saturating_duration_since(epoch).as_nanos() as i64;
            for _ in 0..sensor.pending_flushes {
                ready.push_back(SensorEvent::flush_complete(sensor.handle(), ts));
            }
            sensor.pending_flushes = 0;
        }
    }

    /// Earliest instant at which `advance` could produce something
    fn next_deadline(&self) -> Option<Instant> {
        self.sensors
            .values()
            .flat_map(|s| {
                let release = if s.batching() {
                    s.fifo_since.map(|since| since + s.max_latency)
                } else {
                    None
                };
                s.next_due.into_iter().chain(release)
            })
            .min()
    }

    fn has_output(&self) -> bool {
        !self.ready.is_empty() || !self.injected.is_empty()
    }

    fn drain_into(&mut self, buffer: &mut EventBuffer, limit: usize) -> usize {
        let mut n = 0;
        while n < limit {
            let Some(event) = self.injected.pop_front().or_else(|| self.ready.pop_front()) else {
                break;
            };
            if buffer.push(event).is_err() {
                self.ready.push_front(event);
                break;
            }
            n += 1;
        }
        n
    }
}

/// Mock 传感器设备
///
/// `poll` 阻塞直到有数据、超时或设备关闭；控制接口可从任意线程调用。
#[derive(Debug)]
pub struct MockSensorDevice {
    state: Mutex<DeviceState>,
    wakeup: Condvar,
    epoch: Instant,
    poll_timeout: Duration,
}

impl MockSensorDevice {
    /// 创建新的 Mock 设备
    pub fn new(sensors: Vec<MockSensorConfig>) -> Self {
        let sensors = sensors
            .into_iter()
            .map(|config| (config.descriptor.handle, SimSensor::new(config)))
            .collect();
        Self {
            state: Mutex::new(DeviceState {
                sensors,
                ..Default::default()
            }),
            wakeup: Condvar::new(),
            epoch: Instant::now(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// 根据 blueprint 中的物理传感器创建
    pub fn from_blueprint(blueprint: &EngineBlueprint) -> Self {
        Self::new(
            blueprint
                .sensors
                .iter()
                .map(|s| MockSensorConfig::new(s.to_descriptor(), s.rate_hz))
                .collect(),
        )
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.wakeup.notify_all();
    }

    /// Nanoseconds on the device clock
    pub fn now_ns(&self) -> i64 {
        self.epoch.elapsed().as_nanos() as i64
    }

    /// Queue a scripted event for the next poll, bypassing generation
    pub fn push(&self, event: SensorEvent) {
        self.lock().ready.push_back(event);
        self.notify();
    }

    /// Make the next poll fail with `error`
    pub fn fail_next_poll(&self, error: DeviceError) {
        self.lock().fail_next_poll = Some(error);
        self.notify();
    }

    /// Wake any blocked poll and make future polls return immediately
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify();
    }

    pub fn is_active(&self, handle: SensorHandle) -> bool {
        self.lock().sensors.get(&handle).is_some_and(|s| s.active)
    }

    /// Current (period, max latency) of a sensor
    pub fn rate(&self, handle: SensorHandle) -> Option<(Duration, Duration)> {
        self.lock()
            .sensors
            .get(&handle)
            .map(|s| (s.effective_period(), s.max_latency))
    }

    pub fn mode(&self) -> DeviceMode {
        self.lock().mode
    }

    pub fn active_handles(&self) -> Vec<SensorHandle> {
        self.lock()
            .sensors
            .values()
            .filter(|s| s.active)
            .map(SimSensor::handle)
            .collect()
    }
}

impl SensorDevice for MockSensorDevice {
    fn poll(&self, buffer: &mut EventBuffer, max_count: usize) -> Result<usize, DeviceError> {
        let deadline = Instant::now() + self.poll_timeout;
        let mut state = self.lock();
        loop {
            if let Some(error) = state.fail_next_poll.take() {
                return Err(error);
            }
            let now = Instant::now();
            state.advance(now, self.epoch);

            let limit = max_count.min(buffer.remaining());
            if limit == 0 {
                return Ok(0);
            }
            if state.has_output() {
                let n = state.drain_into(buffer, limit);
                trace!(events = n, "mock device poll");
                return Ok(n);
            }
            if state.closed || now >= deadline {
                return Ok(0);
            }

            let wake_at = state.next_deadline().map_or(deadline, |d| d.min(deadline));
            let wait = wake_at.saturating_duration_since(now);
            state = self
                .wakeup
                .wait_timeout(state, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn activate(&self, handle: SensorHandle, enabled: bool) -> Result<(), DeviceError> {
        let mut state = self.lock();
        let sensor = state.sensor_mut(handle)?;
        if enabled && !sensor.active {
            sensor.active = true;
            sensor.next_due = Some(Instant::now() + sensor.effective_period());
        } else if !enabled {
            sensor.active = false;
            sensor.next_due = None;
            sensor.fifo.clear();
            sensor.fifo_since = None;
        }
        debug!(handle = %handle, enabled, "mock sensor activation");
        drop(state);
        self.notify();
        Ok(())
    }

    fn set_delay(&self, handle: SensorHandle, period: Duration) -> Result<(), DeviceError> {
        self.batch(handle, period, Duration::ZERO)
    }

    fn batch(
        &self,
        handle: SensorHandle,
        period: Duration,
        max_latency: Duration,
    ) -> Result<(), DeviceError> {
        let mut state = self.lock();
        let sensor = state.sensor_mut(handle)?;
        sensor.period = period;
        sensor.max_latency = max_latency;
        trace!(
            handle = %handle,
            period_us = period.as_micros() as u64,
            max_latency_us = max_latency.as_micros() as u64,
            "mock sensor rate"
        );
        drop(state);
        self.notify();
        Ok(())
    }

    fn flush(&self, handle: SensorHandle) -> Result<(), DeviceError> {
        let mut state = self.lock();
        let sensor = state.sensor_mut(handle)?;
        if !sensor.config.flush_supported {
            return Err(DeviceError::Unsupported);
        }
        if !sensor.active {
            return Err(DeviceError::Io(format!("flush on inactive sensor {handle}")));
        }
        sensor.pending_flushes += 1;
        drop(state);
        self.notify();
        Ok(())
    }

    fn inject(&self, event: SensorEvent) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if state.mode != DeviceMode::DataInjection {
            return Err(DeviceError::Unsupported);
        }
        if !state.sensors.contains_key(&event.sensor) {
            return Err(DeviceError::UnknownSensor(event.sensor));
        }
        state.injected.push_back(event);
        drop(state);
        self.notify();
        Ok(())
    }

    fn set_mode(&self, mode: DeviceMode) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if state.mode != mode {
            debug!(?mode, "mock device mode change");
            state.mode = mode;
            state.injected.clear();
        }
        Ok(())
    }
}
