// ── Core error types ──
//
// User-facing errors from dali2mqtt-core. Callers never see raw bus
// interface errors; the `From<dali2mqtt_bus::Error>` impl translates them
// into the bridge's own taxonomy.

use dali2mqtt_bus::Address;
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Bus errors ───────────────────────────────────────────────────
    /// The gear did not answer in time. Expected while scanning.
    #[error("Bus transaction timed out: {command}")]
    TransportTimeout { command: String },

    /// The interface or gear produced something that could not be decoded.
    #[error("Bus transport error: {message}")]
    Transport { message: String },

    // ── Connectivity errors ──────────────────────────────────────────
    #[error("Bus connectivity lost: {reason}")]
    ConnectivityLost { reason: String },

    #[error("Bus reconnection exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    // ── Request errors ───────────────────────────────────────────────
    /// Rejected before any bus traffic.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Device not found: {key}")]
    DeviceNotFound { key: String },

    // ── Discovery errors ─────────────────────────────────────────────
    /// Presence was claimed but the confirmation query failed. The address
    /// is dropped from the scan; this never aborts a scan.
    #[error("Presence of {address} not confirmed")]
    ScanConfirmationFailed { address: Address },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Bridge is not running")]
    BridgeStopped,

    /// The inbound request queue is full; the request was dropped.
    #[error("Command queue full")]
    QueueFull,

    #[error("Publish failed: {message}")]
    Publish { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Connectivity-class errors count against bus health.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::ConnectivityLost { .. } | Self::ReconnectExhausted { .. }
        )
    }
}

// ── Conversion from bus-layer errors ─────────────────────────────────

impl From<dali2mqtt_bus::Error> for CoreError {
    fn from(err: dali2mqtt_bus::Error) -> Self {
        match err {
            dali2mqtt_bus::Error::Timeout { command } => Self::TransportTimeout { command },
            dali2mqtt_bus::Error::NotConnected => Self::ConnectivityLost {
                reason: "interface not connected".into(),
            },
            dali2mqtt_bus::Error::Link(reason) => Self::ConnectivityLost { reason },
            dali2mqtt_bus::Error::Protocol { message } => Self::Transport { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_errors_map_into_taxonomy() {
        let e: CoreError = dali2mqtt_bus::Error::Timeout {
            command: "QUERY_STATUS(A1)".into(),
        }
        .into();
        assert!(matches!(e, CoreError::TransportTimeout { .. }));

        let e: CoreError = dali2mqtt_bus::Error::NotConnected.into();
        assert!(e.is_connectivity());

        let e: CoreError = dali2mqtt_bus::Error::Protocol {
            message: "bad".into(),
        }
        .into();
        assert!(matches!(e, CoreError::Transport { .. }));
    }
}
