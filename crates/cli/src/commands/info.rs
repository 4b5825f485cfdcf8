//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    engine: EngineInfo,
    sensor_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sensors: Vec<SensorInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    clients: Vec<ClientInfo>,
}

#[derive(Serialize)]
struct EngineInfo {
    receive_buffer_events: usize,
    socket_buffer_bytes: usize,
    drain_chunk_events: usize,
    watchdog_interval_ms: u64,
    batching: bool,
}

#[derive(Serialize)]
struct SensorInfo {
    handle: i32,
    name: String,
    sensor_type: String,
    reporting_mode: String,
    wake_up: bool,
    fifo_max_events: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    required_permission: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<i32>,
}

#[derive(Serialize)]
struct ClientInfo {
    package: String,
    uid: u32,
    permissions: Vec<String>,
    subscriptions: Vec<String>,
    ack: bool,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &contracts::EngineBlueprint, args: &InfoArgs) -> ConfigInfo {
    let batching = blueprint.batching_supported();

    let sensors = if args.sensors {
        let physical = blueprint.sensors.iter().map(|s| {
            let desc = s.to_descriptor();
            SensorInfo {
                handle: s.handle,
                name: s.name.clone(),
                sensor_type: s.sensor_type.to_string(),
                reporting_mode: format!("{:?}", desc.reporting_mode),
                wake_up: s.wake_up,
                fifo_max_events: s.fifo_max_events,
                required_permission: s.required_permission.clone(),
                source: None,
            }
        });
        let virtuals = blueprint.virtual_sensors.iter().map(|v| {
            let desc = v.to_descriptor();
            SensorInfo {
                handle: v.handle,
                name: v.name.clone(),
                sensor_type: desc.sensor_type.to_string(),
                reporting_mode: format!("{:?}", desc.reporting_mode),
                wake_up: v.wake_up,
                fifo_max_events: 0,
                required_permission: v.required_permission.clone(),
                source: Some(v.source),
            }
        });
        physical.chain(virtuals).collect()
    } else {
        Vec::new()
    };

    let clients = if args.clients {
        blueprint
            .clients
            .iter()
            .map(|c| ClientInfo {
                package: c.package.clone(),
                uid: c.uid,
                permissions: c.permissions.clone(),
                subscriptions: c
                    .subscriptions
                    .iter()
                    .map(|s| format!("#{}@{}ms/{}ms", s.handle, s.period_ms, s.max_latency_ms))
                    .collect(),
                ack: c.ack,
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        engine: EngineInfo {
            receive_buffer_events: blueprint.engine.receive_buffer_events,
            socket_buffer_bytes: blueprint.engine.socket_buffer_for(batching),
            drain_chunk_events: blueprint.engine.drain_chunk_events(batching),
            watchdog_interval_ms: blueprint.engine.watchdog_interval_ms,
            batching,
        },
        sensor_count: blueprint.sensors.len() + blueprint.virtual_sensors.len(),
        sensors,
        clients,
    }
}

fn print_config_info(blueprint: &contracts::EngineBlueprint, args: &InfoArgs) {
    let batching = blueprint.batching_supported();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                  sensorhub Configuration                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("⚙️  Engine");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!(
        "   ├─ Receive buffer: {} events",
        blueprint.engine.receive_buffer_events
    );
    println!(
        "   ├─ Socket buffer: {} bytes ({})",
        blueprint.engine.socket_buffer_for(batching),
        if batching { "batched" } else { "unbatched" }
    );
    println!(
        "   ├─ Drain chunk: {} events",
        blueprint.engine.drain_chunk_events(batching)
    );
    println!(
        "   └─ Watchdog: {} ms",
        blueprint.engine.watchdog_interval_ms
    );

    println!(
        "\n📡 Sensors ({} physical, {} virtual)",
        blueprint.sensors.len(),
        blueprint.virtual_sensors.len()
    );
    if args.sensors {
        for sensor in &blueprint.sensors {
            println!(
                "   ├─ #{} {} ({}, {} Hz{}{})",
                sensor.handle,
                sensor.name,
                sensor.sensor_type,
                sensor.rate_hz,
                if sensor.wake_up { ", wake-up" } else { "" },
                if sensor.fifo_max_events > 0 {
                    format!(", fifo {}/{}", sensor.fifo_reserved_events, sensor.fifo_max_events)
                } else {
                    String::new()
                }
            );
        }
        for (i, virt) in blueprint.virtual_sensors.iter().enumerate() {
            let prefix = if i == blueprint.virtual_sensors.len() - 1 {
                "└─"
            } else {
                "├─"
            };
            println!(
                "   {} #{} {} ({:?} from #{})",
                prefix, virt.handle, virt.name, virt.kind, virt.source
            );
        }
    }

    if args.clients && !blueprint.clients.is_empty() {
        println!("\n👥 Clients ({})", blueprint.clients.len());
        for (i, client) in blueprint.clients.iter().enumerate() {
            let is_last = i == blueprint.clients.len() - 1;
            let prefix = if is_last { "└─" } else { "├─" };
            let handles: Vec<String> = client
                .subscriptions
                .iter()
                .map(|s| format!("#{}", s.handle))
                .collect();
            println!(
                "   {} {} (uid {}) -> {}",
                prefix,
                client.package,
                client.uid,
                handles.join(", ")
            );
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_info_filters_sections() {
        let blueprint = config_loader::ConfigLoader::load_from_str(
            r#"
[[sensors]]
handle = 1
name = "accel"
sensor_type = "accelerometer"

[[virtual_sensors]]
handle = 10
name = "gravity"
kind = "gravity"
source = 1
"#,
            config_loader::ConfigFormat::Toml,
        )
        .unwrap();

        let args = InfoArgs {
            config: "unused.toml".into(),
            json: true,
            sensors: true,
            clients: false,
        };
        let info = build_config_info(&blueprint, &args);
        assert_eq!(info.sensor_count, 2);
        assert_eq!(info.sensors.len(), 2);
        assert_eq!(info.sensors[1].source, Some(1));
        assert!(info.clients.is_empty());
        assert!(!info.engine.batching);
    }
}
