//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help
//! text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use dali2mqtt_config::ConfigError;
use dali2mqtt_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    /// The bus interface stayed unreachable (EX_UNAVAILABLE).
    pub const TRANSPORT_DEAD: i32 = 69;
    /// A restart was requested over MQTT (EX_TEMPFAIL).
    pub const RESTART: i32 = 75;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(dali2mqtt::config),
        help("Run: dali2mqtt config show\nto inspect the effective configuration.")
    )]
    Config(#[from] ConfigError),

    // ── MQTT ─────────────────────────────────────────────────────────
    #[error("Could not connect to MQTT broker at {server}: {reason}")]
    #[diagnostic(
        code(dali2mqtt::mqtt),
        help(
            "Check that the broker is running and reachable.\n\
             Override with --mqtt-server / --mqtt-port or DALI2MQTT_MQTT__SERVER."
        )
    )]
    Mqtt { server: String, reason: String },

    // ── Bus ──────────────────────────────────────────────────────────
    #[error("DALI bus unavailable: {reason}")]
    #[diagnostic(
        code(dali2mqtt::bus),
        help("Check the bus interface connection and the dali.driver setting.")
    )]
    BusUnavailable { reason: String },

    #[error("DALI interface unreachable for more than {seconds}s")]
    #[diagnostic(
        code(dali2mqtt::transport_dead),
        help("The bridge exits so the service manager can restart it.")
    )]
    TransportDead { seconds: u64 },

    #[error("Restart requested over MQTT")]
    #[diagnostic(code(dali2mqtt::restart))]
    RestartRequested,

    // ── Requests ─────────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(dali2mqtt::validation))]
    Validation { field: String, reason: String },

    #[error("Device '{key}' not found")]
    #[diagnostic(code(dali2mqtt::not_found), help("Run: dali2mqtt scan"))]
    NotFound { key: String },

    #[error("Bridge error: {message}")]
    #[diagnostic(code(dali2mqtt::bridge))]
    Bridge { message: String },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => exit_code::CONFIG,
            Self::Mqtt { .. } | Self::BusUnavailable { .. } => exit_code::CONNECTION,
            Self::TransportDead { .. } => exit_code::TRANSPORT_DEAD,
            Self::RestartRequested => exit_code::RESTART,
            Self::Validation { .. } => exit_code::USAGE,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectivityLost { reason } => Self::BusUnavailable { reason },
            CoreError::ReconnectExhausted { attempts } => Self::BusUnavailable {
                reason: format!("reconnection gave up after {attempts} attempts"),
            },
            CoreError::Validation { message } => Self::Validation {
                field: "request".into(),
                reason: message,
            },
            CoreError::DeviceNotFound { key } => Self::NotFound { key },
            other => Self::Bridge {
                message: other.to_string(),
            },
        }
    }
}
