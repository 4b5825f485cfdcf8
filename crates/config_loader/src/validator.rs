//! 配置校验模块
//!
//! 校验规则：
//! - 字段级规则由 `validator` derive 声明 (rate_hz > 0, 名称非空 ...)
//! - handle 全局唯一 (物理 + 虚拟)
//! - fifo_reserved_events <= fifo_max_events
//! - 虚拟传感器的 source 必须是已声明的加速度计
//! - 客户端订阅的 handle 必须存在

use std::collections::{HashMap, HashSet};

use contracts::{ContractError, EngineBlueprint, SensorType};
use validator::Validate;

/// 校验 EngineBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &EngineBlueprint) -> Result<(), ContractError> {
    validate_fields(blueprint)?;
    validate_handles(blueprint)?;
    validate_fifo(blueprint)?;
    validate_virtual_sources(blueprint)?;
    validate_subscriptions(blueprint)?;
    Ok(())
}

/// 字段级规则
fn validate_fields(blueprint: &EngineBlueprint) -> Result<(), ContractError> {
    blueprint.validate().map_err(|errors| {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "blueprint".to_string());
        ContractError::config_validation(field, errors.to_string())
    })
}

/// 校验 handle 唯一性 (物理与虚拟共用命名空间)
fn validate_handles(blueprint: &EngineBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    let handles = blueprint
        .sensors
        .iter()
        .map(|s| (s.handle, "sensors"))
        .chain(blueprint.virtual_sensors.iter().map(|v| (v.handle, "virtual_sensors")));
    for (handle, section) in handles {
        if !seen.insert(handle) {
            return Err(ContractError::config_validation(
                format!("{section}[handle={handle}]"),
                "duplicate sensor handle",
            ));
        }
    }
    Ok(())
}

/// 校验 FIFO 预留量
fn validate_fifo(blueprint: &EngineBlueprint) -> Result<(), ContractError> {
    for sensor in &blueprint.sensors {
        if sensor.fifo_reserved_events > sensor.fifo_max_events {
            return Err(ContractError::config_validation(
                format!("sensors[{}].fifo_reserved_events", sensor.name),
                format!(
                    "fifo_reserved_events ({}) must be <= fifo_max_events ({})",
                    sensor.fifo_reserved_events, sensor.fifo_max_events
                ),
            ));
        }
    }
    Ok(())
}

/// 虚拟传感器只能由物理加速度计驱动
fn validate_virtual_sources(blueprint: &EngineBlueprint) -> Result<(), ContractError> {
    let physical: HashMap<i32, SensorType> = blueprint
        .sensors
        .iter()
        .map(|s| (s.handle, s.sensor_type))
        .collect();

    for virt in &blueprint.virtual_sensors {
        match physical.get(&virt.source) {
            None => {
                return Err(ContractError::config_validation(
                    format!("virtual_sensors[{}].source", virt.name),
                    format!("source handle {} not found in sensors", virt.source),
                ));
            }
            Some(SensorType::Accelerometer) => {}
            Some(other) => {
                return Err(ContractError::config_validation(
                    format!("virtual_sensors[{}].source", virt.name),
                    format!("source must be an accelerometer, got {other}"),
                ));
            }
        }
    }
    Ok(())
}

/// 校验客户端订阅
fn validate_subscriptions(blueprint: &EngineBlueprint) -> Result<(), ContractError> {
    let known: HashSet<i32> = blueprint
        .sensors
        .iter()
        .map(|s| s.handle)
        .chain(blueprint.virtual_sensors.iter().map(|v| v.handle))
        .collect();

    for client in &blueprint.clients {
        for sub in &client.subscriptions {
            if !known.contains(&sub.handle) {
                return Err(ContractError::config_validation(
                    format!("clients[{}].subscriptions", client.package),
                    format!("sensor handle {} not found", sub.handle),
                ));
            }
        }
    }
    Ok(())
}
