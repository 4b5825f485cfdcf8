//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 模拟 e2e 测试（Mock 设备 + 完整运行时）

#[cfg(test)]
mod contract_tests {
    use contracts::{ConfigVersion, OperatingMode, SensorEvent, SensorHandle, SensorType};

    #[test]
    fn test_contracts_compile() {
        let _ = ConfigVersion::V1;
    }

    #[test]
    fn test_operating_mode_json_shape() {
        let json = serde_json::to_value(OperatingMode::Restricted("com.cts".into())).unwrap();
        assert_eq!(json["mode"], "restricted");
        assert_eq!(json["package"], "com.cts");
        let json = serde_json::to_value(OperatingMode::Normal).unwrap();
        assert_eq!(json["mode"], "normal");
    }

    #[test]
    fn test_flush_marker_keyed_by_target() {
        let marker = SensorEvent::flush_complete(SensorHandle(7), 0);
        assert!(marker.is_flush_complete());
        assert_eq!(marker.target_handle(), SensorHandle(7));
        assert_eq!(marker.sensor_type, SensorType::MetaData);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        ConnectionMode, DeviceError, EngineBlueprint, EngineError, OperatingMode, SensorEvent,
        SensorHandle, SensorType,
    };
    use dispatcher::{EngineHandle, EngineRuntime, RuntimeOptions, SensorEventQueue};
    use ingestion::MockSensorDevice;
    use sensor_engine::{EngineStatus, SensorEngine, TracingWakeLock};

    const ACCEL: SensorHandle = SensorHandle(1);
    const WAKE_ACCEL: SensorHandle = SensorHandle(2);
    const GYRO_PROTECTED: SensorHandle = SensorHandle(3);
    const GRAVITY: SensorHandle = SensorHandle(10);

    const CONFIG: &str = r#"

[engine]
watchdog_interval_ms = 200
client_queue_capacity = 4

[[sensors]]
handle = 1
name = "accel"
sensor_type = "accelerometer"
rate_hz = 200.0

[[sensors]]
handle = 2
name = "accel_wake"
sensor_type = "accelerometer"
wake_up = true
rate_hz = 100.0

[[sensors]]
handle = 3
name = "gyro_protected"
sensor_type = "gyroscope"
required_permission = "android.permission.BODY_SENSORS"
rate_hz = 100.0

[[virtual_sensors]]
handle = 10
name = "gravity"
kind = "gravity"
source = 1
"#;

    fn blueprint() -> EngineBlueprint {
        ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).expect("valid config")
    }

    /// Build device + engine from the shared config and start the runtime
    fn start(blueprint: &EngineBlueprint) -> (Arc<MockSensorDevice>, EngineRuntime) {
        let device = Arc::new(
            MockSensorDevice::from_blueprint(blueprint).with_poll_timeout(Duration::from_millis(10)),
        );
        let engine =
            SensorEngine::from_blueprint(blueprint, device.clone(), Box::new(TracingWakeLock))
                .expect("engine");
        let runtime = EngineRuntime::spawn(engine, RuntimeOptions::default()).expect("runtime");
        (device, runtime)
    }

    async fn connect(handle: &EngineHandle, package: &str) -> SensorEventQueue {
        handle
            .create_connection(
                contracts::ClientIdentity::new(package, 10001),
                ConnectionMode::Normal,
            )
            .await
            .expect("connection")
    }

    /// Read chunks until `pred` matches an event or two seconds pass
    async fn wait_for(
        queue: &mut SensorEventQueue,
        pred: impl Fn(&SensorEvent) -> bool,
    ) -> Option<SensorEvent> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let chunk = tokio::time::timeout_at(deadline, queue.recv()).await.ok()??;
            if let Some(event) = chunk.into_iter().find(|e| pred(e)) {
                return Some(event);
            }
        }
    }

    /// Poll the engine status until `check` holds or two seconds pass
    async fn eventually(handle: &EngineHandle, check: impl Fn(&EngineStatus) -> bool) -> bool {
        for _ in 0..200 {
            if let Ok(status) = handle.status().await {
                if check(&status) {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Two clients share one accelerometer at different rates; the device
    /// runs at the faster one and stops when the last client leaves.
    #[tokio::test]
    async fn test_shared_subscription_aggregates_rate() {
        let blueprint = blueprint();
        let (device, runtime) = start(&blueprint);
        let handle = runtime.handle();

        let mut slow = connect(&handle, "com.example.slow").await;
        let mut fast = connect(&handle, "com.example.fast").await;
        slow.enable(ACCEL, Duration::from_millis(20), Duration::ZERO)
            .await
            .unwrap();
        fast.enable(ACCEL, Duration::from_millis(5), Duration::ZERO)
            .await
            .unwrap();

        let (period, _) = device.rate(ACCEL).unwrap();
        assert_eq!(period, Duration::from_millis(5));

        assert!(wait_for(&mut slow, |e| e.sensor == ACCEL).await.is_some());
        assert!(wait_for(&mut fast, |e| e.sensor == ACCEL).await.is_some());

        fast.disable(ACCEL).await.unwrap();
        let (period, _) = device.rate(ACCEL).unwrap();
        assert_eq!(period, Duration::from_millis(20));

        slow.close().await.unwrap();
        assert!(!device.is_active(ACCEL));

        let report = runtime.shutdown().await.unwrap();
        assert_eq!(report.runtime.connections_opened, 2);
        assert!(report.runtime.events_delivered > 0);
        assert!(report.ingestion.events > 0);
    }

    /// Subscribing to gravity arms its accelerometer source without exposing
    /// raw accelerometer samples to the client.
    #[tokio::test]
    async fn test_virtual_sensor_drives_source() {
        let blueprint = blueprint();
        let (device, runtime) = start(&blueprint);
        let handle = runtime.handle();

        let mut queue = connect(&handle, "com.example.gravity").await;
        queue
            .enable(GRAVITY, Duration::from_millis(10), Duration::ZERO)
            .await
            .unwrap();
        assert!(device.is_active(ACCEL));

        let event = wait_for(&mut queue, |e| e.sensor == GRAVITY).await.unwrap();
        assert_eq!(event.sensor_type, SensorType::Gravity);
        while let Some(chunk) = queue.try_recv() {
            assert!(chunk.iter().all(|e| e.sensor != ACCEL));
        }

        queue.disable(GRAVITY).await.unwrap();
        assert!(!device.is_active(ACCEL));
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_explicit_flush_completes() {
        let blueprint = blueprint();
        let (_device, runtime) = start(&blueprint);
        let handle = runtime.handle();

        let mut queue = connect(&handle, "com.example.flush").await;
        queue
            .enable(ACCEL, Duration::from_millis(10), Duration::from_millis(500))
            .await
            .unwrap();
        queue.flush().await.unwrap();

        let marker = wait_for(&mut queue, |e| e.is_flush_complete()).await;
        assert_eq!(marker.map(|m| m.target_handle()), Some(ACCEL));
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_without_subscription_is_noop() {
        let blueprint = blueprint();
        let (_device, runtime) = start(&blueprint);
        let handle = runtime.handle();

        let mut queue = connect(&handle, "com.example.idle").await;
        queue.flush().await.unwrap();
        assert!(queue.try_recv().is_none());
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_permission_hides_and_rejects() {
        let blueprint = blueprint();
        let (device, runtime) = start(&blueprint);
        let handle = runtime.handle();

        let plain = contracts::ClientIdentity::new("com.example.plain", 10002);
        let visible = handle.sensor_list(plain.clone()).await.unwrap();
        assert!(visible.iter().all(|d| d.handle != GYRO_PROTECTED));

        let granted = plain
            .clone()
            .with_permission("android.permission.BODY_SENSORS");
        let visible = handle.sensor_list(granted).await.unwrap();
        assert!(visible.iter().any(|d| d.handle == GYRO_PROTECTED));

        let queue = connect(&handle, "com.example.plain").await;
        let err = queue
            .enable(GYRO_PROTECTED, Duration::from_millis(10), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied { .. }));
        assert!(!device.is_active(GYRO_PROTECTED));
        runtime.shutdown().await.unwrap();
    }

    /// Restricted mode stops every sensor, only the whitelisted package may
    /// enable, and leaving the mode re-arms the old subscriptions.
    #[tokio::test]
    async fn test_restricted_mode_round_trip() {
        let blueprint = blueprint();
        let (device, runtime) = start(&blueprint);
        let handle = runtime.handle();

        let other = connect(&handle, "com.example.other").await;
        other
            .enable(ACCEL, Duration::from_millis(10), Duration::ZERO)
            .await
            .unwrap();
        assert!(device.is_active(ACCEL));

        handle.enter_restricted("com.android.cts").await.unwrap();
        assert!(!device.is_active(ACCEL));

        let err = other
            .enable(WAKE_ACCEL, Duration::from_millis(10), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied { .. }));

        let cts = connect(&handle, "com.android.cts").await;
        cts.enable(WAKE_ACCEL, Duration::from_millis(10), Duration::ZERO)
            .await
            .unwrap();
        assert!(device.is_active(WAKE_ACCEL));

        // restricted -> data injection is not a legal transition
        let err = handle
            .enter_data_injection("com.android.cts")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOperatingMode { .. }));

        handle.exit_to_normal().await.unwrap();
        assert!(device.is_active(ACCEL));
        assert_eq!(handle.status().await.unwrap().mode, OperatingMode::Normal);
        runtime.shutdown().await.unwrap();
    }

    /// Injected samples reach subscribers; hanging up the injector returns
    /// the engine to normal mode.
    #[tokio::test]
    async fn test_data_injection_flow() {
        let blueprint = blueprint();
        let (device, runtime) = start(&blueprint);
        let handle = runtime.handle();
        let package = "com.example.replay";

        let err = handle
            .create_connection(
                contracts::ClientIdentity::new(package, 10003),
                ConnectionMode::DataInjection,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidOperatingMode { .. }));

        handle.enter_data_injection(package).await.unwrap();
        assert_eq!(device.mode(), contracts::DeviceMode::DataInjection);

        let mut subscriber = connect(&handle, package).await;
        subscriber
            .enable(ACCEL, Duration::from_millis(200), Duration::ZERO)
            .await
            .unwrap();
        let injector = handle
            .create_connection(
                contracts::ClientIdentity::new(package, 10003),
                ConnectionMode::DataInjection,
            )
            .await
            .unwrap();

        let sample = SensorEvent::sample(ACCEL, SensorType::Accelerometer, 1, &[42.0, 0.0, 0.0]);
        injector.inject(sample).await.unwrap();
        let received = wait_for(&mut subscriber, |e| e.values().first() == Some(&42.0)).await;
        assert!(received.is_some(), "injected sample should be dispatched");

        drop(injector);
        assert!(
            eventually(&handle, |s| s.mode == OperatingMode::Normal).await,
            "injector hangup should reset the mode"
        );
        assert_eq!(device.mode(), contracts::DeviceMode::Normal);
        runtime.shutdown().await.unwrap();
    }

    /// A client that stops reading is cached, not disconnected, and gets the
    /// stream back once it drains its queue.
    #[tokio::test]
    async fn test_slow_reader_backpressure() {
        let blueprint = blueprint();
        let (_device, runtime) = start(&blueprint);
        let handle = runtime.handle();

        let mut queue = connect(&handle, "com.example.slow").await;
        queue
            .enable(ACCEL, Duration::from_millis(5), Duration::ZERO)
            .await
            .unwrap();

        let blocked = eventually(&handle, |s| {
            s.connections
                .iter()
                .any(|c| c.stats.would_block > 0 && !c.dead)
        })
        .await;
        assert!(blocked, "unread queue should hit backpressure");

        while queue.try_recv().is_some() {}
        assert!(wait_for(&mut queue, |e| e.sensor == ACCEL).await.is_some());

        let status = handle.status().await.unwrap();
        assert_eq!(status.connections.len(), 1);
        runtime.shutdown().await.unwrap();
    }

    /// Unacknowledged wake-up events keep the lock until the watchdog fires
    #[tokio::test]
    async fn test_watchdog_releases_unacked_wake_lock() {
        let blueprint = blueprint();
        let (_device, runtime) = start(&blueprint);
        let handle = runtime.handle();

        let mut queue = connect(&handle, "com.example.lazy").await;
        queue
            .enable(WAKE_ACCEL, Duration::from_millis(10), Duration::ZERO)
            .await
            .unwrap();
        assert!(wait_for(&mut queue, |e| e.needs_ack).await.is_some());
        queue.disable(WAKE_ACCEL).await.unwrap();
        assert!(handle.status().await.unwrap().wake_lock_held);

        assert!(
            eventually(&handle, |s| !s.wake_lock_held).await,
            "watchdog should release a stuck lock"
        );
        let report = runtime.shutdown().await.unwrap();
        assert!(report.runtime.watchdog_releases >= 1);
    }

    /// A client that never acks cannot keep the lock just because another
    /// client's sensor keeps the poll loop busy.
    #[tokio::test]
    async fn test_watchdog_fires_under_unrelated_traffic() {
        let blueprint = blueprint();
        let (_device, runtime) = start(&blueprint);
        let handle = runtime.handle();

        let mut busy = connect(&handle, "com.example.busy").await;
        busy.enable(ACCEL, Duration::from_millis(5), Duration::ZERO)
            .await
            .unwrap();
        let reader = tokio::spawn(async move {
            let mut received = 0;
            while let Some(chunk) = busy.recv().await {
                received += chunk.len();
            }
            received
        });

        let mut lazy = connect(&handle, "com.example.lazy").await;
        lazy.enable(WAKE_ACCEL, Duration::from_millis(10), Duration::ZERO)
            .await
            .unwrap();
        assert!(wait_for(&mut lazy, |e| e.needs_ack).await.is_some());
        lazy.disable(WAKE_ACCEL).await.unwrap();
        let held = handle.status().await.unwrap();
        assert!(held.wake_lock_held);

        assert!(
            eventually(&handle, |s| !s.wake_lock_held).await,
            "streaming traffic must not mask an unacked wake lock"
        );
        let released = handle.status().await.unwrap();
        assert!(released.batches_processed > held.batches_processed);
        assert!(released.armed.contains(&ACCEL));

        let report = runtime.shutdown().await.unwrap();
        assert!(report.runtime.watchdog_releases >= 1);
        drop(lazy);
        let received = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("busy reader finishes")
            .unwrap();
        assert!(received > 0);
    }

    #[tokio::test]
    async fn test_device_failure_is_fatal() {
        let blueprint = blueprint();
        let (device, runtime) = start(&blueprint);
        let handle = runtime.handle();
        let mut queue = connect(&handle, "com.example.victim").await;

        device.fail_next_poll(DeviceError::Disconnected);
        let result = tokio::time::timeout(Duration::from_secs(2), runtime.wait())
            .await
            .expect("runtime stops");
        assert!(result.unwrap_err().is_device_failure());

        // teardown closes every connection
        let closed = tokio::time::timeout(Duration::from_secs(1), async {
            while queue.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok());
    }
}
