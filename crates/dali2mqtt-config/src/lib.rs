//! Configuration for the dali2mqtt bridge.
//!
//! A single TOML file layered under `DALI2MQTT_*` environment variables,
//! plus the YAML device-names file. Translates into
//! `dali2mqtt_core::BridgeConfig`; the core itself never reads files.

mod names;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use dali2mqtt_bus::{Address, VirtualGear};
use dali2mqtt_core::{BridgeConfig, HealthConfig, ReconnectPolicy};

pub use names::{DevicesNames, NameEntry};

/// Prefix for environment overrides. Nested keys use `__`:
/// `DALI2MQTT_MQTT__SERVER`.
pub const ENV_PREFIX: &str = "DALI2MQTT_";

const REDACTED: &str = "********";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("malformed device names file {path}: {source}")]
    Names {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttSettings,

    /// Topic prefix Home Assistant listens on for discovery.
    pub ha_discovery_prefix: String,

    /// YAML file holding friendly names per device key.
    pub devices_names_file: PathBuf,

    pub log_level: LogLevel,

    /// Colourise log output.
    pub log_color: bool,

    pub dali: DaliSettings,

    pub health: HealthSettings,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MqttSettings {
    pub server: String,
    pub port: u16,
    pub username: Option<String>,

    /// Never serialized; `config show` prints a placeholder instead.
    #[serde(skip_serializing, deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,

    pub base_topic: String,
    pub client_id: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            server: "localhost".into(),
            port: 1883,
            username: None,
            password: None,
            base_topic: "dali2mqtt".into(),
            client_id: "dali2mqtt".into(),
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

/// Log verbosity as written in the config file.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    /// `tracing` filter directive. `critical` has no counterpart and maps to `error`.
    pub fn directive(self) -> &'static str {
        match self {
            Self::Critical | Self::Error => "error",
            Self::Warning => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

/// Which bus interface to drive.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DriverKind {
    /// In-memory bus populated from `dali.simulated_devices`.
    #[default]
    Simulated,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DaliSettings {
    pub driver: DriverKind,
    pub max_reconnect_attempts: u32,
    pub simulated_devices: Vec<VirtualGear>,
}

impl Default for DaliSettings {
    fn default() -> Self {
        Self {
            driver: DriverKind::Simulated,
            max_reconnect_attempts: 5,
            simulated_devices: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthSettings {
    pub check_interval_secs: u64,
    pub failure_threshold: u32,
    /// Zero disables the bus liveness probe.
    pub probe_interval_secs: u64,
    pub restart_after_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            failure_threshold: 3,
            probe_interval_secs: 60,
            restart_after_secs: 120,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttSettings::default(),
            ha_discovery_prefix: "homeassistant".into(),
            devices_names_file: PathBuf::from("devices.yaml"),
            log_level: LogLevel::Info,
            log_color: false,
            dali: DaliSettings::default(),
            health: HealthSettings::default(),
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "dali2mqtt", "dali2mqtt").map_or_else(
        || PathBuf::from("dali2mqtt.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Provider chain: defaults, then the TOML file at `path` (absent is fine),
/// then the environment.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load and validate the configuration. `None` uses [`config_path`].
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let config: Config = figment(&path).extract()?;
    config.validate()?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.port == 0 {
            return Err(ConfigError::validation("mqtt.port", "must be between 1 and 65535"));
        }
        let base = self.mqtt.base_topic.trim();
        if base.is_empty() {
            return Err(ConfigError::validation("mqtt.base_topic", "must not be empty"));
        }
        if base.contains(['+', '#']) {
            return Err(ConfigError::validation(
                "mqtt.base_topic",
                format!("'{base}' contains an MQTT wildcard"),
            ));
        }
        if self.health.failure_threshold == 0 {
            return Err(ConfigError::validation("health.failure_threshold", "must be at least 1"));
        }
        if self.health.check_interval_secs == 0 {
            return Err(ConfigError::validation("health.check_interval_secs", "must be at least 1"));
        }
        if let Some(gear) = self
            .dali
            .simulated_devices
            .iter()
            .find(|g| Address::individual(g.address).is_err())
        {
            return Err(ConfigError::validation(
                "dali.simulated_devices",
                format!("address {} is outside 0..=63", gear.address),
            ));
        }
        Ok(())
    }

    /// Runtime settings for the bridge core.
    pub fn to_bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            reconnect: ReconnectPolicy {
                max_attempts: self.dali.max_reconnect_attempts,
                ..ReconnectPolicy::default()
            },
            health: HealthConfig {
                check_interval: Duration::from_secs(self.health.check_interval_secs),
                failure_threshold: self.health.failure_threshold,
            },
            probe_interval: Duration::from_secs(self.health.probe_interval_secs),
            restart_after: Duration::from_secs(self.health.restart_after_secs),
            ..BridgeConfig::default()
        }
    }

    /// The effective configuration as TOML, password replaced by a placeholder.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut value = toml::Value::try_from(self)?;
        if self.mqtt.password.is_some() {
            if let Some(mqtt) = value.get_mut("mqtt").and_then(toml::Value::as_table_mut) {
                mqtt.insert("password".into(), toml::Value::String(REDACTED.into()));
            }
        }
        Ok(toml::to_string_pretty(&value)?)
    }
}
