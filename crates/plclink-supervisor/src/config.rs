//! JSON configuration: connection, polling cadence, tags and alarms.
//!
//! Loosely typed input is validated once, when the registry and alarm set are
//! built, so the poll loop never re-checks types.

use crate::alarm::{
    AlarmCondition, AlarmDefinition, Severity, DEFAULT_HISTORY_CAPACITY, MAX_HISTORY_CAPACITY,
};
use crate::tags::{DataType, Tag, TagRegistry};
use plclink_client::{ClientConfig, PointKind, Probe, SessionConfig};
use plclink_datalink::TcpConnector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid setting {field}: {reason}")]
    InvalidSetting {
        field: &'static str,
        reason: &'static str,
    },
    #[error("tag {tag}: {reason}")]
    InvalidTag { tag: String, reason: String },
    #[error("duplicate tag {0}")]
    DuplicateTag(String),
    #[error("alarm {alarm} refers to unknown tag {tag}")]
    UnknownAlarmTag { alarm: String, tag: String },
    #[error("duplicate alarm {0}")]
    DuplicateAlarm(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub auto_reconnect: bool,
    /// Seconds between connection attempts.
    pub reconnect_delay: u64,
    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            unit_id: 1,
            auto_reconnect: true,
            reconnect_delay: 5,
            connect_timeout_ms: 3000,
            response_timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    #[serde(alias = "refresh_rate")]
    pub refresh_rate_ms: u64,
    pub history_capacity: usize,
    pub alarms_enabled: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            refresh_rate_ms: 1000,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            alarms_enabled: true,
        }
    }
}

fn scale_one() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagConfig {
    pub address: u16,
    #[serde(rename = "type")]
    pub kind: PointKind,
    #[serde(default = "scale_one", alias = "scaling")]
    pub scale: f64,
    /// Defaults to `bool` for bit kinds and `uint16` for registers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
}

impl TagConfig {
    pub fn new(kind: PointKind, address: u16) -> Self {
        Self {
            address,
            kind,
            scale: 1.0,
            data_type: None,
            unit: String::new(),
        }
    }

    pub fn to_tag(&self, name: &str) -> Tag {
        Tag::new(
            name,
            self.kind,
            self.address,
            self.data_type.unwrap_or(DataType::default_for(self.kind)),
        )
        .with_scale(self.scale)
        .with_unit(self.unit.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmConfig {
    pub id: String,
    pub tag: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub condition: AlarmCondition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub modbus: ModbusConfig,
    pub polling: PollingConfig,
    pub tags: BTreeMap<String, TagConfig>,
    /// Evaluated in this order every cycle.
    pub alarms: Vec<AlarmConfig>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(
            "temperature".to_string(),
            TagConfig {
                scale: 0.1,
                unit: "°C".to_string(),
                ..TagConfig::new(PointKind::HoldingRegister, 100)
            },
        );
        tags.insert(
            "pressure".to_string(),
            TagConfig {
                scale: 0.01,
                unit: "bar".to_string(),
                ..TagConfig::new(PointKind::HoldingRegister, 101)
            },
        );
        tags.insert(
            "motor_running".to_string(),
            TagConfig::new(PointKind::Coil, 0),
        );

        let alarm = |id: &str, tag: &str, description: &str, severity, condition| AlarmConfig {
            id: id.to_string(),
            tag: tag.to_string(),
            description: description.to_string(),
            severity,
            condition,
        };
        let alarms = vec![
            alarm(
                "high_temperature",
                "temperature",
                "Temperature above 80 °C",
                Severity::High,
                AlarmCondition::Above(80.0),
            ),
            alarm(
                "low_temperature",
                "temperature",
                "Temperature below 5 °C",
                Severity::Medium,
                AlarmCondition::Below(5.0),
            ),
            alarm(
                "high_pressure",
                "pressure",
                "Pressure above 10 bar",
                Severity::High,
                AlarmCondition::Above(10.0),
            ),
        ];

        Self {
            modbus: ModbusConfig::default(),
            polling: PollingConfig::default(),
            tags,
            alarms,
        }
    }
}

impl SupervisorConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&json)?;
        info!(path = %path.display(), tags = config.tags.len(), "configuration loaded");
        Ok(config)
    }

    /// Loads `path`, or the stock configuration when the file does not exist.
    /// A file that exists but does not parse is an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "configuration file not found, using defaults");
            return Ok(Self::default());
        }
        Self::from_path(path)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, self.to_json_string()?).map_err(io_err)?;
        info!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.modbus.host.trim().is_empty() {
            return Err(ConfigError::InvalidSetting {
                field: "modbus.host",
                reason: "must not be empty",
            });
        }
        if self.polling.refresh_rate_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "polling.refresh_rate_ms",
                reason: "must be positive",
            });
        }
        if self.polling.history_capacity == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "polling.history_capacity",
                reason: "must be positive",
            });
        }
        if self.polling.history_capacity > MAX_HISTORY_CAPACITY {
            return Err(ConfigError::InvalidSetting {
                field: "polling.history_capacity",
                reason: "must not exceed 100",
            });
        }
        if self.modbus.response_timeout_ms == 0 || self.modbus.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "modbus timeouts",
                reason: "must be positive",
            });
        }
        Ok(())
    }

    pub fn refresh_rate(&self) -> Duration {
        Duration::from_millis(self.polling.refresh_rate_ms)
    }

    pub fn connector(&self) -> TcpConnector {
        TcpConnector::new(self.modbus.host.clone(), self.modbus.port)
            .with_connect_timeout(Duration::from_millis(self.modbus.connect_timeout_ms))
    }

    /// Session settings. The registry's first tag doubles as the connect
    /// probe; for registries built from config that is the tag whose name
    /// sorts first.
    pub fn session_config(&self, registry: &TagRegistry) -> SessionConfig {
        let probe = registry
            .tags()
            .first()
            .map(|tag| Probe {
                kind: tag.kind,
                address: tag.address,
            })
            .unwrap_or_default();
        SessionConfig::default()
            .with_unit_id(self.modbus.unit_id)
            .with_auto_reconnect(self.modbus.auto_reconnect)
            .with_reconnect_delay(Duration::from_secs(self.modbus.reconnect_delay))
            .with_client(
                ClientConfig::default()
                    .with_response_timeout(Duration::from_millis(self.modbus.response_timeout_ms)),
            )
            .with_probe(Some(probe))
    }

    pub fn registry(&self) -> Result<TagRegistry, ConfigError> {
        TagRegistry::from_config(&self.tags)
    }

    /// Resolves alarm sources against `registry`, keeping declaration order.
    pub fn alarm_definitions(
        &self,
        registry: &TagRegistry,
    ) -> Result<Vec<AlarmDefinition>, ConfigError> {
        let mut seen = HashSet::new();
        self.alarms
            .iter()
            .map(|alarm| {
                if !seen.insert(alarm.id.as_str()) {
                    return Err(ConfigError::DuplicateAlarm(alarm.id.clone()));
                }
                let source = registry
                    .get(&alarm.tag)
                    .ok_or_else(|| ConfigError::UnknownAlarmTag {
                        alarm: alarm.id.clone(),
                        tag: alarm.tag.clone(),
                    })?;
                Ok(AlarmDefinition {
                    id: alarm.id.clone(),
                    source: Arc::clone(source),
                    description: alarm.description.clone(),
                    severity: alarm.severity,
                    condition: alarm.condition,
                })
            })
            .collect()
    }
}
