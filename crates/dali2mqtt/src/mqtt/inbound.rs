// ── Inbound message parsing ──

use thiserror::Error;

use dali2mqtt_core::{BridgeRequest, DeviceKey, Operation};

use super::topics::{DeviceTopic, Inbound, Topics};

pub const PAYLOAD_ON: &str = "ON";
pub const PAYLOAD_OFF: &str = "OFF";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InboundError {
    #[error("not a command topic: {0}")]
    UnknownTopic(String),

    #[error("'{0}' is not a device key")]
    UnknownDevice(String),

    #[error("cannot use '{payload}' on {topic}")]
    BadPayload { topic: String, payload: String },
}

/// Turn a received message into a bridge request.
pub fn parse_request(topics: &Topics, topic: &str, payload: &[u8]) -> Result<BridgeRequest, InboundError> {
    let (key, device_topic) = match topics.resolve(topic) {
        Some(Inbound::Scan) => return Ok(BridgeRequest::Rescan),
        Some(Inbound::Restart) => return Ok(BridgeRequest::Restart),
        Some(Inbound::Device { key, topic }) => (key, topic),
        None => return Err(InboundError::UnknownTopic(topic.to_owned())),
    };
    let address = DeviceKey::parse(key).ok_or_else(|| InboundError::UnknownDevice(key.to_owned()))?;

    let text = std::str::from_utf8(payload).unwrap_or_default().trim();
    let bad = || InboundError::BadPayload {
        topic: topic.to_owned(),
        payload: String::from_utf8_lossy(payload).into_owned(),
    };

    let operation = match device_topic {
        DeviceTopic::Switch => {
            if text.eq_ignore_ascii_case(PAYLOAD_ON) {
                Operation::TurnOn
            } else if text.eq_ignore_ascii_case(PAYLOAD_OFF) {
                Operation::Off
            } else {
                return Err(bad());
            }
        }
        DeviceTopic::BrightnessSet => Operation::SetLevel(text.parse().map_err(|_| bad())?),
        DeviceTopic::ColorTempSet => Operation::SetColorTemperature(text.parse().map_err(|_| bad())?),
        DeviceTopic::FadeTimeSet => Operation::SetFadeTime(text.parse().map_err(|_| bad())?),
        DeviceTopic::FadeRateSet => Operation::SetFadeRate(text.parse().map_err(|_| bad())?),
        _ => return Err(InboundError::UnknownTopic(topic.to_owned())),
    };
    Ok(BridgeRequest::Apply { address, operation })
}
