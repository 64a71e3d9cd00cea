// ── Device domain types ──

use chrono::{DateTime, Utc};
use dali2mqtt_bus::{Address, MAX_LEVEL};
use serde::{Deserialize, Serialize};
use strum::Display;

use super::key::DeviceKey;

/// Highest encoded fade time / fade rate.
pub const MAX_FADE: u8 = 15;

/// Reconciliation progress of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unscanned,
    Reconciling,
    Ready,
}

/// Dimming range. `0 <= physical_minimum <= min_level <= max_level <= 254`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelLimits {
    pub physical_minimum: u8,
    pub min_level: u8,
    pub max_level: u8,
}

impl Default for LevelLimits {
    fn default() -> Self {
        Self {
            physical_minimum: 0,
            min_level: 0,
            max_level: MAX_LEVEL,
        }
    }
}

impl LevelLimits {
    /// Build limits from raw answers, restoring the ordering invariant.
    /// Out-of-order answers fall back to the universal bounds.
    pub fn normalised(physical_minimum: u8, min_level: u8, max_level: u8) -> Self {
        let max_level = max_level.min(MAX_LEVEL);
        if physical_minimum <= min_level && min_level <= max_level {
            Self {
                physical_minimum,
                min_level,
                max_level,
            }
        } else {
            Self::default()
        }
    }

    /// `0` is always accepted (it means off); anything else must lie in
    /// `[min_level, max_level]`.
    pub fn accepts(&self, level: u8) -> bool {
        level == 0 || (self.min_level..=self.max_level).contains(&level)
    }

    /// Map a requested brightness in `0..=254` onto the arc level range
    /// `[min_level, max_level]`. `0` stays `0` (off).
    pub fn scale(&self, requested: u8) -> u8 {
        if requested == 0 {
            return 0;
        }
        let span = u32::from(self.max_level.saturating_sub(self.min_level));
        let offset = u32::from(requested.min(MAX_LEVEL)) * span / u32::from(MAX_LEVEL);
        // offset <= span, so the sum never exceeds max_level
        u8::try_from(u32::from(self.min_level) + offset).unwrap_or(self.max_level)
    }
}

/// Colour temperature capability, in mired. Only constructed when the gear
/// reports both bounds and a current value inside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTemperature {
    pub coolest: u16,
    pub warmest: u16,
    pub current: u16,
}

impl ColorTemperature {
    /// All-or-nothing: partial support is not representable.
    pub fn from_readings(coolest: Option<u16>, warmest: Option<u16>, current: Option<u16>) -> Option<Self> {
        let (coolest, warmest, current) = (coolest?, warmest?, current?);
        if coolest == 0 || warmest == 0 || coolest > warmest {
            return None;
        }
        (coolest..=warmest).contains(&current).then_some(Self {
            coolest,
            warmest,
            current,
        })
    }

    pub fn accepts(&self, mired: u16) -> bool {
        (self.coolest..=self.warmest).contains(&mired)
    }
}

/// Encoded fade parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fade {
    /// 0..=15
    pub time: u8,
    /// 1..=15 (0 only as the unreadable fallback)
    pub rate: u8,
}

/// Display-only information. Never consulted for control decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub device_type: String,
    pub device_types: Vec<u8>,
    pub gtin: Option<String>,
    pub firmware_version: Option<String>,
    pub luminaire_id: Option<String>,
}

impl Default for DeviceMetadata {
    fn default() -> Self {
        Self {
            device_type: "Generic DALI Ballast".into(),
            device_types: Vec::new(),
            gtin: None,
            firmware_version: None,
            luminaire_id: None,
        }
    }
}

impl DeviceMetadata {
    /// Model string for discovery: luminaire id when known, else device type.
    pub fn model(&self) -> &str {
        self.luminaire_id.as_deref().unwrap_or(&self.device_type)
    }
}

/// One record per discovered individual address, populated group and the
/// broadcast target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub address: Address,
    pub key: DeviceKey,
    pub limits: LevelLimits,
    /// Current arc level, `0` = off.
    pub level: u8,
    /// Last non-zero level, restored by a plain "on".
    pub last_active_level: Option<u8>,
    pub color_temperature: Option<ColorTemperature>,
    pub fade: Fade,
    pub metadata: DeviceMetadata,
    pub state: LifecycleState,
    pub updated_at: DateTime<Utc>,
}

impl DeviceRecord {
    /// A fresh, not yet reconciled record.
    pub fn unscanned(address: Address) -> Self {
        Self {
            address,
            key: DeviceKey::from(address),
            limits: LevelLimits::default(),
            level: 0,
            last_active_level: None,
            color_temperature: None,
            fade: Fade::default(),
            metadata: DeviceMetadata::default(),
            state: LifecycleState::Unscanned,
            updated_at: Utc::now(),
        }
    }

    /// Fixed record for write-only targets (groups and broadcast).
    pub fn virtual_default(address: Address) -> Self {
        let label = match address {
            Address::Group(_) => "DALI group",
            Address::Broadcast => "DALI broadcast",
            Address::Individual(_) => "Generic DALI Ballast",
        };
        Self {
            metadata: DeviceMetadata {
                device_type: label.into(),
                ..DeviceMetadata::default()
            },
            state: LifecycleState::Ready,
            ..Self::unscanned(address)
        }
    }

    pub fn is_on(&self) -> bool {
        self.level > 0
    }

    pub fn supports_color_temperature(&self) -> bool {
        self.color_temperature.is_some()
    }

    /// Record a commanded or observed level.
    pub fn set_level(&mut self, level: u8) {
        self.level = level;
        if level > 0 {
            self.last_active_level = Some(level);
        }
        self.touch();
    }

    pub fn set_color_temperature(&mut self, mired: u16) {
        if let Some(ct) = self.color_temperature.as_mut() {
            ct.current = mired;
            self.touch();
        }
    }

    pub fn set_fade_time(&mut self, time: u8) {
        self.fade.time = time;
        self.touch();
    }

    pub fn set_fade_rate(&mut self, rate: u8) {
        self.fade.rate = rate;
        self.touch();
    }

    /// Level a plain "on" restores: the last non-zero level, or max.
    pub fn on_level(&self) -> u8 {
        self.last_active_level
            .filter(|l| self.limits.accepts(*l))
            .unwrap_or(self.limits.max_level)
    }

    /// Whether the field values match, ignoring the update timestamp.
    pub fn same_state(&self, other: &Self) -> bool {
        Self {
            updated_at: other.updated_at,
            ..self.clone()
        } == *other
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
