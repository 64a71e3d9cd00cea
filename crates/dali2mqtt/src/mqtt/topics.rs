// ── Topic layout ──
//
// Every topic lives under the configured base. Per-device topics embed the
// device key (`7`, `group_3`, `broadcast`), never the display name.

use dali2mqtt_core::DeviceKey;

/// One per-device topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTopic {
    Switch,
    SwitchState,
    BrightnessSet,
    BrightnessState,
    ColorTempSet,
    ColorTempState,
    FadeTimeSet,
    FadeTimeState,
    FadeRateSet,
    FadeRateState,
}

impl DeviceTopic {
    /// Topics the bridge subscribes to.
    pub const COMMANDS: [Self; 5] = [
        Self::Switch,
        Self::BrightnessSet,
        Self::ColorTempSet,
        Self::FadeTimeSet,
        Self::FadeRateSet,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Switch => "light/switch",
            Self::SwitchState => "light/status",
            Self::BrightnessSet => "light/brightness/set",
            Self::BrightnessState => "light/brightness/status",
            Self::ColorTempSet => "light/color_temp/set",
            Self::ColorTempState => "light/color_temp/status",
            Self::FadeTimeSet => "fade_time/set",
            Self::FadeTimeState => "fade_time/status",
            Self::FadeRateSet => "fade_rate/set",
            Self::FadeRateState => "fade_rate/status",
        }
    }
}

/// A topic the bridge listens on, resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound<'a> {
    Device { key: &'a str, topic: DeviceTopic },
    Scan,
    Restart,
}

#[derive(Debug, Clone)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim().trim_end_matches('/').to_owned(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Bridge availability, `online` / `offline`. Also the last will.
    pub fn availability(&self) -> String {
        format!("{}/status", self.base)
    }

    pub fn bridge_status(&self) -> String {
        format!("{}/bridge/status", self.base)
    }

    pub fn restart(&self) -> String {
        format!("{}/bridge/request/restart", self.base)
    }

    pub fn scan(&self) -> String {
        format!("{}/scan", self.base)
    }

    pub fn device(&self, key: &DeviceKey, topic: DeviceTopic) -> String {
        format!("{}/{}/{}", self.base, key, topic.suffix())
    }

    /// Subscription filters: one wildcard filter per command topic plus the
    /// bridge-wide requests.
    pub fn subscriptions(&self) -> Vec<String> {
        DeviceTopic::COMMANDS
            .iter()
            .map(|t| format!("{}/+/{}", self.base, t.suffix()))
            .chain([self.scan(), self.restart()])
            .collect()
    }

    /// Resolve an incoming topic. `None` for anything the bridge does not
    /// handle, including its own state topics.
    pub fn resolve<'a>(&self, topic: &'a str) -> Option<Inbound<'a>> {
        let rest = topic.strip_prefix(self.base.as_str())?.strip_prefix('/')?;
        match rest {
            "scan" => return Some(Inbound::Scan),
            "bridge/request/restart" => return Some(Inbound::Restart),
            _ => {}
        }
        let (key, suffix) = rest.split_once('/')?;
        DeviceTopic::COMMANDS
            .into_iter()
            .find(|t| t.suffix() == suffix)
            .map(|topic| Inbound::Device { key, topic })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dali2mqtt_bus::Address;
    use pretty_assertions::assert_eq;

    #[test]
    fn device_topics_use_key() {
        let t = Topics::new("dali2mqtt/");
        let key = DeviceKey::from(Address::Group(3));
        assert_eq!(t.device(&key, DeviceTopic::BrightnessState), "dali2mqtt/group_3/light/brightness/status");
        assert_eq!(t.availability(), "dali2mqtt/status");
        assert_eq!(t.bridge_status(), "dali2mqtt/bridge/status");
    }

    #[test]
    fn subscriptions_cover_commands() {
        let subs = Topics::new("home/dali").subscriptions();
        assert_eq!(
            subs,
            vec![
                "home/dali/+/light/switch",
                "home/dali/+/light/brightness/set",
                "home/dali/+/light/color_temp/set",
                "home/dali/+/fade_time/set",
                "home/dali/+/fade_rate/set",
                "home/dali/scan",
                "home/dali/bridge/request/restart",
            ]
        );
    }

    #[test]
    fn resolve_inbound() {
        let t = Topics::new("dali2mqtt");
        assert_eq!(
            t.resolve("dali2mqtt/7/light/switch"),
            Some(Inbound::Device { key: "7", topic: DeviceTopic::Switch })
        );
        assert_eq!(
            t.resolve("dali2mqtt/broadcast/fade_rate/set"),
            Some(Inbound::Device { key: "broadcast", topic: DeviceTopic::FadeRateSet })
        );
        assert_eq!(t.resolve("dali2mqtt/scan"), Some(Inbound::Scan));
        assert_eq!(t.resolve("dali2mqtt/bridge/request/restart"), Some(Inbound::Restart));
        assert_eq!(t.resolve("dali2mqtt/7/light/status"), None);
        assert_eq!(t.resolve("dali2mqttx/7/light/switch"), None);
        assert_eq!(t.resolve("other/7/light/switch"), None);
    }
}
