// ── Outbound seams ──
//
// The core never talks to the message bus or the names file directly.
// It hands records and status to a `StatePublisher` and asks `DeviceNames`
// for display names; the binary provides both.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::health::{HealthStatus, HealthSummary};
use crate::model::{DeviceKey, DeviceRecord, default_name};

/// Retained bridge status document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStatus {
    pub status: HealthStatus,
    /// The interface link works but the bus does not (no bus power).
    pub bus_error: bool,
    pub timestamp: DateTime<Utc>,
    pub health: HealthSummary,
}

#[async_trait]
pub trait StatePublisher: Send + Sync {
    /// Current state of one record (switch, level, colour, fade).
    async fn publish_state(&self, record: &DeviceRecord) -> Result<(), CoreError>;

    /// Discovery metadata for one record under its display name.
    async fn publish_discovery(&self, record: &DeviceRecord, name: &str) -> Result<(), CoreError>;

    /// Withdraw discovery metadata for a record that disappeared.
    async fn retract_discovery(&self, key: &DeviceKey) -> Result<(), CoreError>;

    /// Bridge-wide availability.
    async fn publish_availability(&self, online: bool) -> Result<(), CoreError>;

    async fn publish_bridge_status(&self, status: &BridgeStatus) -> Result<(), CoreError>;
}

/// Display names per device key.
pub trait DeviceNames: Send + Sync {
    /// The stored name for `key`, if any.
    fn name(&self, key: &DeviceKey) -> Option<String>;

    /// Add entries for keys not yet known; existing names are kept.
    fn register(&self, entries: &[(DeviceKey, String)]) -> Result<(), CoreError>;
}

/// Name for `record`: the stored one, else derived from the address.
pub fn display_name(names: &dyn DeviceNames, record: &DeviceRecord) -> String {
    names
        .name(&record.key)
        .unwrap_or_else(|| default_name(record.address))
}

// ── Inert implementations ────────────────────────────────────────────

/// Publishes nothing. Used for one-shot scans.
#[derive(Debug, Default)]
pub struct NullPublisher;

#[async_trait]
impl StatePublisher for NullPublisher {
    async fn publish_state(&self, _: &DeviceRecord) -> Result<(), CoreError> {
        Ok(())
    }

    async fn publish_discovery(&self, _: &DeviceRecord, _: &str) -> Result<(), CoreError> {
        Ok(())
    }

    async fn retract_discovery(&self, _: &DeviceKey) -> Result<(), CoreError> {
        Ok(())
    }

    async fn publish_availability(&self, _: bool) -> Result<(), CoreError> {
        Ok(())
    }

    async fn publish_bridge_status(&self, _: &BridgeStatus) -> Result<(), CoreError> {
        Ok(())
    }
}

/// No stored names; every record uses its address-derived name.
#[derive(Debug, Default)]
pub struct NoNames;

impl DeviceNames for NoNames {
    fn name(&self, _: &DeviceKey) -> Option<String> {
        None
    }

    fn register(&self, _: &[(DeviceKey, String)]) -> Result<(), CoreError> {
        Ok(())
    }
}
