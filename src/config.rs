//! Application configuration

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;

use crate::errors::EramError;
use crate::flight::{DatablockPosition, DisplayDefaults, Owner};
use crate::store::StoreSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub position: PositionConfig,
    pub transport: TransportConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub snapshot: Option<SnapshotConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Position being worked
#[derive(Debug, Deserialize, Clone)]
pub struct PositionConfig {
    pub facility: String,
    pub sector: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    Mqtt(MqttConfig),
    Files(FilesConfig),
}

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    pub uri: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub websocket: bool,
    pub topics: Vec<String>,
    pub client_id: String,
}

/// Replay of recorded payloads from a directory
#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct FilesConfig {
    pub directory: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    #[serde(default = "default_replay_interval")]
    pub interval: Duration,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub stale_after: Duration,
    pub default_datablock_position: DatablockPosition,
    pub default_leader_length: u8,
    /// How often stale flights are swept while no payloads arrive
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub sweep_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(10),
            default_datablock_position: DatablockPosition::SE,
            default_leader_length: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub failed_payload_path: PathBuf,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            failed_payload_path: PathBuf::from("failed-parsing.xml"),
        }
    }
}

/// Periodic JSON dump of the flight table
#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotConfig {
    pub path: PathBuf,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub interval: Duration,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Log every processed record with its processing time
    #[serde(default)]
    pub message_timestamps: bool,
}

fn default_channel_capacity() -> usize {
    100
}

fn default_mqtt_port() -> u16 {
    443
}

fn default_extension() -> String {
    "xml".to_string()
}

fn default_replay_interval() -> Duration {
    Duration::from_millis(1000)
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("ERAM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("transport.topics"),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), EramError> {
        self.position.validate()?;
        self.store.validate()?;
        if let TransportConfig::Mqtt(mqtt) = &self.transport {
            mqtt.validate()?;
        }
        if self.channel_capacity == 0 {
            return Err(invalid("Channel capacity must be greater than zero"));
        }
        Ok(())
    }

    pub fn current_position(&self) -> Owner {
        Owner::new(&self.position.facility, &self.position.sector)
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            stale_after: self.store.stale_after,
            display: DisplayDefaults {
                datablock_position: self.store.default_datablock_position,
                leader_length: self.store.default_leader_length,
            },
        }
    }
}

impl PositionConfig {
    fn validate(&self) -> Result<(), EramError> {
        if self.facility.trim().is_empty() {
            return Err(invalid("Facility cannot be empty"));
        }
        if self.sector.trim().is_empty() {
            return Err(invalid("Sector cannot be empty"));
        }
        Ok(())
    }
}

impl StoreConfig {
    fn validate(&self) -> Result<(), EramError> {
        if self.stale_after.is_zero() {
            return Err(invalid("Stale window must be greater than zero"));
        }
        if self.sweep_interval.is_zero() {
            return Err(invalid("Sweep interval must be greater than zero"));
        }
        if self.default_leader_length > 9 {
            return Err(invalid("Leader length must be between 0 and 9"));
        }
        Ok(())
    }
}

impl MqttConfig {
    fn validate(&self) -> Result<(), EramError> {
        if self.topics.is_empty() {
            return Err(invalid("At least one MQTT topic is required"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> EramError {
    EramError::ConfigurationError {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_load_config() {
        env::set_var("ERAM__POSITION__FACILITY", "ZJX");
        env::set_var("ERAM__POSITION__SECTOR", "66");
        env::set_var("ERAM__TRANSPORT__KIND", "mqtt");
        env::set_var("ERAM__TRANSPORT__URI", "mqtt://localhost");
        env::set_var("ERAM__TRANSPORT__PORT", "1883");
        env::set_var("ERAM__TRANSPORT__TOPICS", "topic1,topic2");
        env::set_var("ERAM__TRANSPORT__CLIENT_ID", "test_client");
        env::set_var("ERAM__STORE__STALE_AFTER", "60");
        env::set_var("ERAM__STORE__DEFAULT_DATABLOCK_POSITION", "NE");
        env::set_var("ERAM__STORE__DEFAULT_LEADER_LENGTH", "2");

        let config = AppConfig::load().unwrap();
        assert_eq!(config.current_position(), Owner::new("ZJX", "66"));
        match &config.transport {
            TransportConfig::Mqtt(mqtt) => {
                assert_eq!(mqtt.uri, "mqtt://localhost");
                assert_eq!(mqtt.port, 1883);
                assert!(!mqtt.websocket);
                assert_eq!(mqtt.topics, vec!["topic1", "topic2"]);
                assert_eq!(mqtt.client_id, "test_client");
            }
            other => panic!("unexpected transport {other:?}"),
        }

        let settings = config.store_settings();
        assert_eq!(settings.stale_after, Duration::from_secs(60));
        assert_eq!(settings.display.datablock_position, DatablockPosition::NE);
        assert_eq!(settings.display.leader_length, 2);
        assert_eq!(config.store.sweep_interval, Duration::from_secs(10));
        assert_eq!(
            config.diagnostics.failed_payload_path,
            PathBuf::from("failed-parsing.xml")
        );
        assert!(config.snapshot.is_none());
        assert_eq!(config.channel_capacity, 100);
        assert!(config.validate().is_ok());
    }

    fn config() -> AppConfig {
        AppConfig {
            position: PositionConfig {
                facility: "ZJX".to_string(),
                sector: "66".to_string(),
            },
            transport: TransportConfig::Files(FilesConfig {
                directory: PathBuf::from("messages"),
                extension: default_extension(),
                interval: default_replay_interval(),
            }),
            store: StoreConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            snapshot: None,
            logging: LoggingConfig::default(),
            channel_capacity: 100,
        }
    }

    #[test]
    fn test_validate_defaults() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.store_settings(), StoreSettings::default());
    }

    #[test]
    fn test_validate_empty_sector() {
        let mut config = config();
        config.position.sector = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_stale_window() {
        let mut config = config();
        config.store.stale_after = Duration::from_secs(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_sweep_interval() {
        let mut config = config();
        config.store.sweep_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_leader_length() {
        let mut config = config();
        config.store.default_leader_length = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_no_topics() {
        let mut config = config();
        config.transport = TransportConfig::Mqtt(MqttConfig {
            uri: "mqtt://localhost".to_string(),
            port: 1883,
            websocket: false,
            topics: Vec::new(),
            client_id: "test".to_string(),
        });
        assert!(config.validate().is_err());
    }
}
