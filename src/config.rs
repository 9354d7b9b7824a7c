use rumqttc::QoS;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Settings for one daemon run, loaded once and shared read-only.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Hostname or IP of the MQTT broker, e.g. "mosquitto".
    pub mqtt_host: String,
    pub mqtt_port: u16,
    #[serde(default)]
    pub mqtt_user_name: Option<String>,
    /// 0..=2, defaults to 0.
    #[serde(default, rename = "mqttQoS")]
    pub mqtt_qos: u8,
    #[serde(default)]
    pub mqtt_password: Option<String>,

    /// Base URL of owhttpd, e.g. "http://onewire:2121".
    pub ow_http_host: String,
    pub devices: Vec<DeviceConfig>,
    pub interval_seconds: u64,
}

/// One measurement to read from a 1-wire device and the topic it goes to.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// 1-wire id, e.g. "28.1234000000".
    pub device_id: String,
    /// e.g. "temperature"
    pub measurement: String,
    /// e.g. "onewire/kitchen_temperature"
    pub topic: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Parsing error: {0}")]
    ParsingError(#[from] serde_json::Error),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
    #[error("Device '{device_id}' requests measurement '{measurement}' more than once")]
    DuplicateMeasurement {
        device_id: String,
        measurement: String,
    },
}

/// Supplies the configuration snapshot the service runs with.
pub trait ConfigSource {
    fn config(&self) -> Result<Arc<Config>, ConfigError>;
}

/// Reads a camelCase JSON file on first use and hands out the cached result afterwards.
#[derive(Debug)]
pub struct JsonConfigProvider {
    path: PathBuf,
    config: OnceLock<Arc<Config>>,
}

impl JsonConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: OnceLock::new(),
        }
    }
}

impl ConfigSource for JsonConfigProvider {
    fn config(&self) -> Result<Arc<Config>, ConfigError> {
        if let Some(config) = self.config.get() {
            return Ok(config.clone());
        }

        let json = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        let config = Config::from_json(&json)?;

        Ok(self.config.get_or_init(|| Arc::new(config)).clone())
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file named by `OWFS_MQTT_CONFIG`, or `config.json`.
    pub fn from_env() -> Result<Arc<Self>, ConfigError> {
        let path = env::var("OWFS_MQTT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        JsonConfigProvider::new(path).config()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.mqtt_host.trim().is_empty() {
            return Err(invalid("mqttHost", "must not be empty"));
        }
        if self.ow_http_host.trim().is_empty() {
            return Err(invalid("owHttpHost", "must not be empty"));
        }
        if self.interval_seconds == 0 {
            return Err(invalid("intervalSeconds", "must be greater than 0"));
        }
        if self.mqtt_qos > 2 {
            return Err(invalid("mqttQoS", "must be 0, 1 or 2"));
        }

        let mut seen = HashSet::new();
        for (index, device) in self.devices.iter().enumerate() {
            let field = format!("devices[{}]", index);
            if device.device_id.is_empty() {
                return Err(invalid(&field, "deviceId must not be empty"));
            }
            if device.measurement.is_empty() {
                return Err(invalid(&field, "measurement must not be empty"));
            }
            if device.topic.is_empty() {
                return Err(invalid(&field, "topic must not be empty"));
            }
            if !seen.insert((device.device_id.as_str(), device.measurement.as_str())) {
                return Err(ConfigError::DuplicateMeasurement {
                    device_id: device.device_id.clone(),
                    measurement: device.measurement.clone(),
                });
            }
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn qos(&self) -> QoS {
        match self.mqtt_qos {
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtMostOnce,
        }
    }

    /// Username and password, only when a username is configured.
    pub fn credentials(&self) -> Option<(String, String)> {
        match self.mqtt_user_name.as_deref() {
            Some(user) if !user.is_empty() => Some((
                user.to_string(),
                self.mqtt_password.clone().unwrap_or_default(),
            )),
            _ => None,
        }
    }
}
