// ── StatePublisher over MQTT ──

#[cfg(test)]
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};

use dali2mqtt_core::{BridgeStatus, CoreError, DeviceKey, DeviceRecord, StatePublisher};

use super::inbound::{PAYLOAD_OFF, PAYLOAD_ON};
use super::topics::{DeviceTopic, Topics};
use crate::discovery::Discovery;

pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

/// Where outgoing messages go.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, topic: String, payload: Vec<u8>, retain: bool) -> Result<(), CoreError>;
}

#[async_trait]
impl MessageSink for AsyncClient {
    async fn send(&self, topic: String, payload: Vec<u8>, retain: bool) -> Result<(), CoreError> {
        self.publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| CoreError::Publish { message: e.to_string() })
    }
}

/// Keeps every message in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<(String, String, bool)>>,
}

#[cfg(test)]
impl MemorySink {
    /// `(topic, payload, retain)` in send order.
    pub fn messages(&self) -> Vec<(String, String, bool)> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Last payload sent to `topic`.
    pub fn last(&self, topic: &str) -> Option<String> {
        self.messages()
            .into_iter()
            .rev()
            .find(|(t, _, _)| t == topic)
            .map(|(_, p, _)| p)
    }
}

#[cfg(test)]
#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&self, topic: String, payload: Vec<u8>, retain: bool) -> Result<(), CoreError> {
        let payload = String::from_utf8_lossy(&payload).into_owned();
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((topic, payload, retain));
        Ok(())
    }
}

pub struct MqttPublisher<S> {
    sink: S,
    topics: Topics,
    discovery: Discovery,
}

impl<S: MessageSink> MqttPublisher<S> {
    pub fn new(sink: S, topics: Topics, discovery_prefix: &str) -> Self {
        let discovery = Discovery::new(discovery_prefix, topics.clone());
        Self {
            sink,
            topics,
            discovery,
        }
    }

    #[cfg(test)]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    async fn send(&self, topic: String, payload: impl Into<Vec<u8>>) -> Result<(), CoreError> {
        self.sink.send(topic, payload.into(), true).await
    }

    /// Announce the bridge device to Home Assistant.
    pub async fn announce_bridge(&self, driver: &str) -> Result<(), CoreError> {
        for (topic, payload) in self.discovery.bridge_configs(driver) {
            self.send(topic, payload.to_string()).await?;
        }
        Ok(())
    }

    /// The retained status document left behind on a requested restart.
    pub async fn publish_offline_status(&self) -> Result<(), CoreError> {
        self.send(self.topics.bridge_status(), r#"{"status":"offline"}"#).await
    }
}

#[async_trait]
impl<S: MessageSink> StatePublisher for MqttPublisher<S> {
    async fn publish_state(&self, record: &DeviceRecord) -> Result<(), CoreError> {
        let key = &record.key;
        let switch = if record.is_on() { PAYLOAD_ON } else { PAYLOAD_OFF };
        self.send(self.topics.device(key, DeviceTopic::SwitchState), switch).await?;
        self.send(
            self.topics.device(key, DeviceTopic::BrightnessState),
            record.level.to_string(),
        )
        .await?;
        if let Some(ct) = record.color_temperature {
            self.send(
                self.topics.device(key, DeviceTopic::ColorTempState),
                ct.current.to_string(),
            )
            .await?;
        }
        self.send(
            self.topics.device(key, DeviceTopic::FadeTimeState),
            record.fade.time.to_string(),
        )
        .await?;
        self.send(
            self.topics.device(key, DeviceTopic::FadeRateState),
            record.fade.rate.to_string(),
        )
        .await
    }

    async fn publish_discovery(&self, record: &DeviceRecord, name: &str) -> Result<(), CoreError> {
        let configs = self
            .discovery
            .record_configs(record, name)
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        for (topic, payload) in configs {
            self.send(topic, payload).await?;
        }
        Ok(())
    }

    async fn retract_discovery(&self, key: &DeviceKey) -> Result<(), CoreError> {
        // An empty retained payload removes the entity.
        for topic in self.discovery.record_topics(key) {
            self.send(topic, Vec::new()).await?;
        }
        Ok(())
    }

    async fn publish_availability(&self, online: bool) -> Result<(), CoreError> {
        let payload = if online { ONLINE } else { OFFLINE };
        self.send(self.topics.availability(), payload).await
    }

    async fn publish_bridge_status(&self, status: &BridgeStatus) -> Result<(), CoreError> {
        let payload = serde_json::to_vec(status).map_err(|e| CoreError::Internal(e.to_string()))?;
        self.send(self.topics.bridge_status(), payload).await
    }
}
