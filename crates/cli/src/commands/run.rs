//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{error, info};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    info!(
        sensors = blueprint.sensors.len(),
        virtual_sensors = blueprint.virtual_sensors.len(),
        clients = blueprint.clients.len(),
        batching = blueprint.batching_supported(),
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let pipeline_config = PipelineConfig {
        blueprint,
        max_batches: (args.max_batches > 0).then_some(args.max_batches),
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        batch_buffer: args.batch_buffer,
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    };

    info!("Starting engine...");
    let stats = Pipeline::new(pipeline_config)
        .run(shutdown_signal())
        .await
        .context("Engine run failed")?;

    info!(
        batches = stats.report.runtime.batches,
        delivered = stats.report.runtime.events_delivered,
        duration_secs = stats.duration.as_secs_f64(),
        events_per_sec = format!("{:.2}", stats.events_per_sec()),
        "Engine run completed successfully"
    );
    stats.print_summary();

    info!("sensorhub finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed never
/// resolves.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &contracts::EngineBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Engine:");
    println!(
        "  Receive buffer: {} events",
        blueprint.engine.receive_buffer_events
    );
    println!(
        "  Socket buffer: {} bytes",
        blueprint
            .engine
            .socket_buffer_for(blueprint.batching_supported())
    );
    println!("  Watchdog: {} ms", blueprint.engine.watchdog_interval_ms);

    println!("\nSensors ({}):", blueprint.sensors.len());
    for sensor in &blueprint.sensors {
        println!(
            "  - #{} {} ({}, {} Hz{})",
            sensor.handle,
            sensor.name,
            sensor.sensor_type,
            sensor.rate_hz,
            if sensor.wake_up { ", wake-up" } else { "" }
        );
    }

    if !blueprint.virtual_sensors.is_empty() {
        println!("\nVirtual sensors ({}):", blueprint.virtual_sensors.len());
        for virt in &blueprint.virtual_sensors {
            println!(
                "  - #{} {} ({:?} from #{})",
                virt.handle, virt.name, virt.kind, virt.source
            );
        }
    }

    if !blueprint.clients.is_empty() {
        println!("\nClients ({}):", blueprint.clients.len());
        for client in &blueprint.clients {
            println!(
                "  - {} ({} subscriptions)",
                client.package,
                client.subscriptions.len()
            );
        }
    }

    println!();
}
