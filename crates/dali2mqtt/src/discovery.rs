//! Home Assistant MQTT discovery payloads.
//!
//! One `light` entity per record plus two `number` entities for its fade
//! settings, and a bridge device carrying a status sensor, a bus-error
//! binary sensor and a restart button.

use serde::Serialize;
use serde_json::{Value, json};

use dali2mqtt_bus::{Address, MAX_LEVEL};
use dali2mqtt_core::model::MAX_FADE;
use dali2mqtt_core::{DeviceKey, DeviceRecord};

use crate::mqtt::inbound::PAYLOAD_OFF;
use crate::mqtt::topics::{DeviceTopic, Topics};

const MANUFACTURER: &str = "dali2mqtt";
const AVAILABLE: &str = "online";
const NOT_AVAILABLE: &str = "offline";

/// Discovery topics and payload builder.
#[derive(Debug, Clone)]
pub struct Discovery {
    prefix: String,
    topics: Topics,
}

#[derive(Debug, Serialize)]
struct DeviceInfo<'a> {
    ids: &'a str,
    name: &'a str,
    sw: String,
    mdl: &'a str,
    hw: &'a str,
    mf: &'static str,
}

#[derive(Debug, Serialize)]
struct LightConfig<'a> {
    name: &'a str,
    uniq_id: &'a str,
    def_ent_id: String,
    stat_t: String,
    cmd_t: String,
    pl_off: &'static str,
    bri_stat_t: String,
    bri_cmd_t: String,
    bri_scl: u8,
    on_cmd_type: &'static str,
    avty_t: String,
    pl_avail: &'static str,
    pl_not_avail: &'static str,
    device: DeviceInfo<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sup_clrm: Option<[&'static str; 1]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    clr_temp_stat_t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    clr_temp_cmd_t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_mirs: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_mirs: Option<u16>,
}

#[derive(Debug, Serialize)]
struct NumberConfig<'a> {
    name: &'static str,
    uniq_id: String,
    stat_t: String,
    cmd_t: String,
    min: u8,
    max: u8,
    mode: &'static str,
    entity_category: &'static str,
    avty_t: String,
    pl_avail: &'static str,
    pl_not_avail: &'static str,
    icon: &'static str,
    device: DeviceInfo<'a>,
}

/// Stable unique id of a record's device.
pub fn unique_id(address: Address) -> String {
    match address {
        Address::Individual(id) => format!("dali2mqtt_lamp_{id}"),
        Address::Group(id) => format!("dali2mqtt_group_{id}"),
        Address::Broadcast => "dali2mqtt_broadcast".to_owned(),
    }
}

fn software_version(record: &DeviceRecord) -> String {
    let mut sw = format!("dali2mqtt {}", env!("CARGO_PKG_VERSION"));
    if let Some(ref fw) = record.metadata.firmware_version {
        sw.push_str(" / Lamp FW ");
        sw.push_str(fw);
    }
    sw
}

impl Discovery {
    pub fn new(prefix: &str, topics: Topics) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_owned(),
            topics,
        }
    }

    // ── Topics ───────────────────────────────────────────────────────

    pub fn light_topic(&self, key: &DeviceKey) -> String {
        format!("{}/light/dali2mqtt_{key}/config", self.prefix)
    }

    pub fn fade_time_topic(&self, key: &DeviceKey) -> String {
        format!("{}/number/dali2mqtt_{key}_fadetime/config", self.prefix)
    }

    pub fn fade_rate_topic(&self, key: &DeviceKey) -> String {
        format!("{}/number/dali2mqtt_{key}_faderate/config", self.prefix)
    }

    /// Every discovery topic owned by one record.
    pub fn record_topics(&self, key: &DeviceKey) -> [String; 3] {
        [
            self.light_topic(key),
            self.fade_time_topic(key),
            self.fade_rate_topic(key),
        ]
    }

    // ── Payloads ─────────────────────────────────────────────────────

    fn device_info<'a>(&self, record: &'a DeviceRecord, uniq: &'a str, name: &'a str) -> DeviceInfo<'a> {
        DeviceInfo {
            ids: uniq,
            name,
            sw: software_version(record),
            mdl: record.metadata.model(),
            hw: record.metadata.gtin.as_deref().unwrap_or("rev 1.0"),
            mf: MANUFACTURER,
        }
    }

    /// `(topic, payload)` pairs announcing `record` under `name`.
    pub fn record_configs(&self, record: &DeviceRecord, name: &str) -> serde_json::Result<Vec<(String, String)>> {
        let key = &record.key;
        let uniq = unique_id(record.address);
        let ct = record.color_temperature;

        let light = LightConfig {
            name,
            uniq_id: &uniq,
            def_ent_id: format!("dali_light_{key}"),
            stat_t: self.topics.device(key, DeviceTopic::SwitchState),
            cmd_t: self.topics.device(key, DeviceTopic::Switch),
            pl_off: PAYLOAD_OFF,
            bri_stat_t: self.topics.device(key, DeviceTopic::BrightnessState),
            bri_cmd_t: self.topics.device(key, DeviceTopic::BrightnessSet),
            bri_scl: MAX_LEVEL,
            on_cmd_type: "brightness",
            avty_t: self.topics.availability(),
            pl_avail: AVAILABLE,
            pl_not_avail: NOT_AVAILABLE,
            device: self.device_info(record, &uniq, name),
            sup_clrm: ct.map(|_| ["color_temp"]),
            clr_temp_stat_t: ct.map(|_| self.topics.device(key, DeviceTopic::ColorTempState)),
            clr_temp_cmd_t: ct.map(|_| self.topics.device(key, DeviceTopic::ColorTempSet)),
            min_mirs: ct.map(|c| c.coolest),
            max_mirs: ct.map(|c| c.warmest),
        };

        let number = |label, suffix, state, set, min, icon| NumberConfig {
            name: label,
            uniq_id: format!("{uniq}_{suffix}"),
            stat_t: self.topics.device(key, state),
            cmd_t: self.topics.device(key, set),
            min,
            max: MAX_FADE,
            mode: "box",
            entity_category: "config",
            avty_t: self.topics.availability(),
            pl_avail: AVAILABLE,
            pl_not_avail: NOT_AVAILABLE,
            icon,
            device: self.device_info(record, &uniq, name),
        };
        let fade_time = number(
            "Fade Time",
            "fadetime",
            DeviceTopic::FadeTimeState,
            DeviceTopic::FadeTimeSet,
            0,
            "mdi:timer-sand",
        );
        let fade_rate = number(
            "Fade Rate",
            "faderate",
            DeviceTopic::FadeRateState,
            DeviceTopic::FadeRateSet,
            1,
            "mdi:speedometer",
        );

        Ok(vec![
            (self.light_topic(key), serde_json::to_string(&light)?),
            (self.fade_time_topic(key), serde_json::to_string(&fade_time)?),
            (self.fade_rate_topic(key), serde_json::to_string(&fade_rate)?),
        ])
    }

    /// The bridge's own device: status sensor, bus-error sensor, restart button.
    pub fn bridge_configs(&self, driver: &str) -> Vec<(String, Value)> {
        let status_topic = self.topics.bridge_status();
        let device = json!({
            "identifiers": ["dali2mqtt_bridge"],
            "name": "DALI2MQTT Bridge",
            "model": format!("DALI Bridge ({driver})"),
            "manufacturer": MANUFACTURER,
            "sw_version": env!("CARGO_PKG_VERSION"),
        });

        vec![
            (
                format!("{}/sensor/dali2mqtt_bridge_status/config", self.prefix),
                json!({
                    "name": "Bridge Status",
                    "unique_id": "dali2mqtt_bridge_status",
                    "state_topic": status_topic,
                    "value_template": "{{ value_json.status }}",
                    "icon": "mdi:bridge",
                    "device": device,
                    "entity_category": "diagnostic",
                }),
            ),
            (
                format!("{}/binary_sensor/dali2mqtt_bridge_bus_error/config", self.prefix),
                json!({
                    "name": "DALI Bus Error",
                    "unique_id": "dali2mqtt_bridge_bus_error",
                    "state_topic": status_topic,
                    "value_template": "{{ 'ON' if value_json.bus_error else 'OFF' }}",
                    "device_class": "problem",
                    "device": device,
                    "entity_category": "diagnostic",
                }),
            ),
            (
                format!("{}/button/dali2mqtt_bridge_restart/config", self.prefix),
                json!({
                    "name": "Restart Bridge",
                    "unique_id": "dali2mqtt_bridge_restart",
                    "command_topic": self.topics.restart(),
                    "payload_press": "restart",
                    "icon": "mdi:restart",
                    "device": device,
                    "entity_category": "config",
                }),
            ),
        ]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use dali2mqtt_core::ColorTemperature;
    use pretty_assertions::assert_eq;

    fn discovery() -> Discovery {
        Discovery::new("homeassistant", Topics::new("dali2mqtt"))
    }

    fn payload(configs: &[(String, String)], topic: &str) -> Value {
        let (_, raw) = configs.iter().find(|(t, _)| t == topic).unwrap();
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn light_config_for_plain_gear() {
        let mut record = DeviceRecord::unscanned(Address::Individual(4));
        record.limits.max_level = 200;
        let d = discovery();

        let configs = d.record_configs(&record, "Kitchen").unwrap();
        assert_eq!(configs.len(), 3);

        let light = payload(&configs, "homeassistant/light/dali2mqtt_4/config");
        assert_eq!(light["name"], "Kitchen");
        assert_eq!(light["uniq_id"], "dali2mqtt_lamp_4");
        assert_eq!(light["cmd_t"], "dali2mqtt/4/light/switch");
        assert_eq!(light["bri_cmd_t"], "dali2mqtt/4/light/brightness/set");
        assert_eq!(light["bri_scl"], 254);
        assert_eq!(light["avty_t"], "dali2mqtt/status");
        assert_eq!(light["device"]["hw"], "rev 1.0");
        assert!(light.get("sup_clrm").is_none());
        assert!(light.get("min_mirs").is_none());
    }

    #[test]
    fn colour_fields_only_when_capable() {
        let mut record = DeviceRecord::unscanned(Address::Individual(4));
        record.color_temperature = Some(ColorTemperature {
            coolest: 153,
            warmest: 370,
            current: 250,
        });
        record.metadata.gtin = Some("4050300000001".into());

        let configs = discovery().record_configs(&record, "4").unwrap();
        let light = payload(&configs, "homeassistant/light/dali2mqtt_4/config");
        assert_eq!(light["sup_clrm"], json!(["color_temp"]));
        assert_eq!(light["clr_temp_cmd_t"], "dali2mqtt/4/light/color_temp/set");
        assert_eq!(light["min_mirs"], 153);
        assert_eq!(light["max_mirs"], 370);
        assert_eq!(light["device"]["hw"], "4050300000001");
    }

    #[test]
    fn fade_numbers() {
        let record = DeviceRecord::virtual_default(Address::Group(3));
        let configs = discovery().record_configs(&record, "group_3").unwrap();

        let time = payload(&configs, "homeassistant/number/dali2mqtt_group_3_fadetime/config");
        assert_eq!(time["uniq_id"], "dali2mqtt_group_3_fadetime");
        assert_eq!(time["cmd_t"], "dali2mqtt/group_3/fade_time/set");
        assert_eq!((time["min"].as_u64(), time["max"].as_u64()), (Some(0), Some(15)));

        let rate = payload(&configs, "homeassistant/number/dali2mqtt_group_3_faderate/config");
        assert_eq!(rate["min"], 1);
        assert_eq!(rate["device"]["ids"], "dali2mqtt_group_3");
    }

    #[test]
    fn bridge_entities() {
        let configs = discovery().bridge_configs("simulated");
        let topics: Vec<_> = configs.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(
            topics,
            vec![
                "homeassistant/sensor/dali2mqtt_bridge_status/config",
                "homeassistant/binary_sensor/dali2mqtt_bridge_bus_error/config",
                "homeassistant/button/dali2mqtt_bridge_restart/config",
            ]
        );
        assert_eq!(configs[2].1["command_topic"], "dali2mqtt/bridge/request/restart");
        assert_eq!(configs[0].1["device"]["model"], "DALI Bridge (simulated)");
    }
}
