//! 配置解析模块
//!
//! 支持 TOML (主要) 和 JSON (可选) 格式。

use contracts::{ContractError, EngineBlueprint};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML 格式 (推荐)
    Toml,
    /// JSON 格式
    Json,
}

impl ConfigFormat {
    /// 从文件扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// 解析 TOML 格式配置
pub fn parse_toml(content: &str) -> Result<EngineBlueprint, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 解析 JSON 格式配置
pub fn parse_json(content: &str) -> Result<EngineBlueprint, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 根据格式解析配置
pub fn parse(content: &str, format: ConfigFormat) -> Result<EngineBlueprint, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{SensorType, VirtualSensorKind};

    #[test]
    fn test_parse_toml_minimal() {
        let content = r#"
[[sensors]]
handle = 1
name = "accel"
sensor_type = "accelerometer"
rate_hz = 100.0
fifo_reserved_events = 300
fifo_max_events = 3000

[[virtual_sensors]]
handle = 10
name = "gravity"
kind = "gravity"
source = 1

[[clients]]
package = "com.example.fitness"
[[clients.subscriptions]]
handle = 10
period_ms = 20
"#;
        let result = parse_toml(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let bp = result.unwrap();
        assert_eq!(bp.sensors.len(), 1);
        assert_eq!(bp.sensors[0].sensor_type, SensorType::Accelerometer);
        assert_eq!(bp.virtual_sensors[0].kind, VirtualSensorKind::Gravity);
        // defaults fill the engine section
        assert_eq!(bp.engine.receive_buffer_events, 256);
        assert!(bp.clients[0].ack);
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "engine": { "watchdog_interval_ms": 1000 },
            "sensors": [{
                "handle": 3,
                "name": "light",
                "sensor_type": "light",
                "reporting_mode": "on_change"
            }]
        }"#;
        let result = parse_json(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let bp = result.unwrap();
        assert_eq!(bp.engine.watchdog_interval_ms, 1000);
        assert!(bp.clients.is_empty());
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let content = "invalid toml [[[";
        let result = parse_toml(content);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }

    #[test]
    fn test_unknown_sensor_type_rejected() {
        let content = r#"
[[sensors]]
handle = 1
name = "radar"
sensor_type = "radar"
"#;
        assert!(matches!(
            parse_toml(content),
            Err(ContractError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_extension("toml"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("TOML"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("json"),
            Some(ConfigFormat::Json)
        );
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
