// Shared helpers for the integration tests.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use dali2mqtt_core::{BridgeStatus, CoreError, DeviceKey, DeviceRecord, HealthStatus, StatePublisher};

/// One call made to a [`RecordingPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Published {
    State { key: DeviceKey, level: u8, color_temperature: Option<u16> },
    Discovery { key: DeviceKey, name: String },
    Retract { key: DeviceKey },
    Availability(bool),
    BridgeStatus { status: HealthStatus, bus_error: bool },
}

/// Keeps every publish in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    log: Mutex<Vec<Published>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Published> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn push(&self, entry: Published) -> Result<(), CoreError> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        Ok(())
    }
}

#[async_trait]
impl StatePublisher for RecordingPublisher {
    async fn publish_state(&self, record: &DeviceRecord) -> Result<(), CoreError> {
        self.push(Published::State {
            key: record.key.clone(),
            level: record.level,
            color_temperature: record.color_temperature.map(|ct| ct.current),
        })
    }

    async fn publish_discovery(&self, record: &DeviceRecord, name: &str) -> Result<(), CoreError> {
        self.push(Published::Discovery {
            key: record.key.clone(),
            name: name.to_owned(),
        })
    }

    async fn retract_discovery(&self, key: &DeviceKey) -> Result<(), CoreError> {
        self.push(Published::Retract { key: key.clone() })
    }

    async fn publish_availability(&self, online: bool) -> Result<(), CoreError> {
        self.push(Published::Availability(online))
    }

    async fn publish_bridge_status(&self, status: &BridgeStatus) -> Result<(), CoreError> {
        self.push(Published::BridgeStatus {
            status: status.status,
            bus_error: status.bus_error,
        })
    }
}
