use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use std::path::Path;
use std::time::Duration;

use crate::mqtt::MqttConfig;

/// Poll loop settings, re-read at the start of every cycle. YAML is a
/// superset of JSON, so `app_config.json` files load unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub delay_between_inverters_ms: i64,
    pub delay_between_cycles_ms: i64,
    pub mqtt_broker_ip: String,
    pub mqtt_broker_port: u16,
    pub mqtt_user: String,
    pub mqtt_password: String,
    pub mqtt_topic: String,
    pub mqtt_retain: bool,
    pub inverter1_tcp_ip: String,
    pub inverter1_tcp_port: i64,
    pub read_timeout_ms: u64,
    /// Parallel unit ids to poll, in publish order.
    pub units: Vec<u8>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            delay_between_inverters_ms: 1000,
            delay_between_cycles_ms: 5000,
            mqtt_broker_ip: "127.0.0.1".into(),
            mqtt_broker_port: 1883,
            mqtt_user: String::new(),
            mqtt_password: String::new(),
            mqtt_topic: "homeassistant/axpert".into(),
            mqtt_retain: true,
            inverter1_tcp_ip: "10.0.0.235".into(),
            inverter1_tcp_port: i64::from(Self::DEFAULT_INVERTER_PORT),
            read_timeout_ms: 5000,
            units: vec![0, 1],
        }
    }
}

impl AppConfig {
    pub const DEFAULT_CONFIG_FILE: &'static str = "config/app_config.json";
    pub const DEFAULT_INVERTER_PORT: u16 = 26;
    const MINIMUM_INVERTER_DELAY_MS: i64 = 100;

    pub fn load(config_file_path: &Path) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open config file {config_file_path:?}"))?;
        let document: Value = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read config from file: {config_file_path:?}"))?;
        let entries = match document {
            Value::Mapping(entries) => entries,
            Value::Null => Default::default(),
            _ => bail!("Config file {config_file_path:?} is not a key/value document"),
        };

        // Each key is taken on its own; a bad value keeps that key's default.
        let mut config = Self::default();
        for (key, value) in entries {
            let Some(key) = key.as_str() else {
                log::warn!("Ignoring non-string config key {key:?}");
                continue;
            };
            if let Err(err) = config.set(key, value) {
                log::warn!("Ignoring config key '{key}': {err}");
            }
        }
        Ok(config)
    }

    fn set(&mut self, key: &str, value: Value) -> serde_yaml::Result<()> {
        fn assign<T: DeserializeOwned>(slot: &mut T, value: Value) -> serde_yaml::Result<()> {
            *slot = serde_yaml::from_value(value)?;
            Ok(())
        }
        match key {
            "delay_between_inverters_ms" => assign(&mut self.delay_between_inverters_ms, value),
            "delay_between_cycles_ms" => assign(&mut self.delay_between_cycles_ms, value),
            "mqtt_broker_ip" => assign(&mut self.mqtt_broker_ip, value),
            "mqtt_broker_port" => assign(&mut self.mqtt_broker_port, value),
            "mqtt_user" => assign(&mut self.mqtt_user, value),
            "mqtt_password" => assign(&mut self.mqtt_password, value),
            "mqtt_topic" => assign(&mut self.mqtt_topic, value),
            "mqtt_retain" => assign(&mut self.mqtt_retain, value),
            "inverter1_tcp_ip" => assign(&mut self.inverter1_tcp_ip, value),
            "inverter1_tcp_port" => assign(&mut self.inverter1_tcp_port, value),
            "read_timeout_ms" => assign(&mut self.read_timeout_ms, value),
            "units" => assign(&mut self.units, value),
            _ => {
                log::debug!("Unknown config key '{key}'");
                Ok(())
            }
        }
    }

    /// Like [`AppConfig::load`], but a missing or broken file only costs a
    /// warning and the defaults are used.
    pub fn load_or_default(config_file_path: &Path) -> Self {
        if !config_file_path.exists() {
            log::warn!("{config_file_path:?} not found, using defaults");
            return Self::default();
        }
        match Self::load(config_file_path) {
            Ok(config) => {
                log::info!("Configuration loaded from {config_file_path:?}");
                config
            }
            Err(err) => {
                log::warn!("{err:#}, using defaults");
                Self::default()
            }
        }
    }

    pub fn inverter_delay(&self) -> Duration {
        let ms = self
            .delay_between_inverters_ms
            .max(Self::MINIMUM_INVERTER_DELAY_MS);
        Duration::from_millis(ms as u64)
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.delay_between_cycles_ms.max(0) as u64)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn inverter_port(&self) -> u16 {
        u16::try_from(self.inverter1_tcp_port)
            .ok()
            .filter(|port| *port != 0)
            .unwrap_or(Self::DEFAULT_INVERTER_PORT)
    }

    pub fn inverter_endpoint(&self) -> String {
        format!("{}:{}", self.inverter1_tcp_ip, self.inverter_port())
    }

    pub fn mqtt(&self) -> MqttConfig {
        MqttConfig {
            host: self.mqtt_broker_ip.clone(),
            port: self.mqtt_broker_port,
            username: Some(self.mqtt_user.clone()).filter(|user| !user.is_empty()),
            password: self.mqtt_password.clone(),
        }
    }

    /// Topic of the `index`-th configured unit: `<topic>/inv01`, `<topic>/inv02`, ...
    pub fn unit_topic(&self, index: usize) -> String {
        format!("{}/inv{:02}", self.mqtt_topic, index + 1)
    }

    pub fn totals_topic(&self) -> String {
        format!("{}/totales", self.mqtt_topic)
    }
}

/// Command line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout: Option<Duration>,
    pub units: Option<Vec<u8>>,
}

impl Overrides {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.inverter1_tcp_ip = host.clone();
        }
        if let Some(port) = self.port {
            config.inverter1_tcp_port = i64::from(port);
        }
        if let Some(timeout) = self.timeout {
            config.read_timeout_ms = timeout.as_millis() as u64;
        }
        if let Some(units) = &self.units {
            config.units = units.clone();
        }
    }
}
