//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;
use crate::error::CliError;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    sensor_count: usize,
    virtual_sensor_count: usize,
    client_count: usize,
    batching: bool,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    match result.error {
        None => Ok(()),
        Some(error) => Err(CliError::config_validation(error).into()),
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    sensor_count: blueprint.sensors.len(),
                    virtual_sensor_count: blueprint.virtual_sensors.len(),
                    client_count: blueprint.clients.len(),
                    batching: blueprint.batching_supported(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &contracts::EngineBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.clients.is_empty() {
        warnings.push("No clients configured - `run` will only poll the device".to_string());
    }

    for client in &blueprint.clients {
        if client.subscriptions.is_empty() {
            warnings.push(format!(
                "Client '{}' has no subscriptions configured",
                client.package
            ));
        }
        let subscribes_wake_up = client
            .subscriptions
            .iter()
            .any(|sub| is_wake_up(blueprint, sub.handle));
        if subscribes_wake_up && !client.ack {
            warnings.push(format!(
                "Client '{}' subscribes to wake-up sensors without acknowledging; the wake lock stays held until the watchdog fires",
                client.package
            ));
        }
    }

    warnings
}

/// Whether `handle` names a wake-up sensor, physical or virtual
fn is_wake_up(blueprint: &contracts::EngineBlueprint, handle: i32) -> bool {
    blueprint
        .sensors
        .iter()
        .any(|s| s.handle == handle && s.wake_up)
        || blueprint
            .virtual_sensors
            .iter()
            .any(|v| v.handle == handle && v.wake_up)
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Sensors: {}", summary.sensor_count);
            println!("  Virtual sensors: {}", summary.virtual_sensor_count);
            println!("  Clients: {}", summary.client_count);
            println!("  Batching: {}", summary.batching);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
