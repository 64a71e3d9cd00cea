// ── State reconciliation ──
//
// Builds a `DeviceRecord` for one individual address from bus reads. Every
// step is independent: a failed read degrades that one field to its
// default and logs, it never aborts the record.

use dali2mqtt_bus::{
    Address, ColourValue, Command, FadeTimeRate, GearStatus, MAX_LEVEL, Opcode, Sequence,
    sequence::{MEMORY_FIRMWARE_VERSION, MEMORY_GTIN, MEMORY_LUMINAIRE_ID, MemoryField, device_type_label},
};
use tracing::{debug, warn};

use crate::config::LevelRetryPolicy;
use crate::error::CoreError;
use crate::model::{ColorTemperature, DeviceMetadata, DeviceRecord, Fade, LevelLimits, LifecycleState};
use crate::supervisor::ConnectionSupervisor;

/// Level reported for a lamp that is on but whose level cannot be read.
///
/// A policy choice, not a protocol fact: over-reporting brightness is
/// preferred to showing a lit lamp at 0%.
pub const ASSUMED_ON_LEVEL: u8 = MAX_LEVEL;

/// Query `address` and build its record. Never fails; see module docs.
pub async fn reconcile(
    supervisor: &ConnectionSupervisor,
    policy: &LevelRetryPolicy,
    address: Address,
) -> DeviceRecord {
    let mut record = DeviceRecord::unscanned(address);
    record.state = LifecycleState::Reconciling;
    debug!(%address, "reconciling");

    let reader = Reader {
        supervisor,
        address,
    };

    record.limits = reader.limits().await;
    record.fade = reader.fade().await;
    let level = reader.level(policy).await;
    record.set_level(level);
    record.color_temperature = reader.color_temperature().await;
    record.metadata = reader.metadata().await;

    record.state = LifecycleState::Ready;
    record
}

/// Re-read the actual level of an individual address.
///
/// Returns `None` when the gear still answers MASK after every attempt or
/// answers something non-numeric; callers keep their cached value then.
pub async fn refresh_level(
    supervisor: &ConnectionSupervisor,
    policy: &LevelRetryPolicy,
    address: Address,
) -> Result<Option<u8>, CoreError> {
    let query = Command::gear(address, Opcode::QueryActualLevel);
    for attempt in 1..=policy.refresh_attempts {
        let response = supervisor.send(query).await?;
        if let Some(level) = response.level() {
            return Ok(Some(level));
        }
        if !response.is_mask() {
            break;
        }
        if attempt < policy.refresh_attempts {
            tokio::time::sleep(policy.refresh_delay).await;
        }
    }
    debug!(%address, "level still unreadable, keeping cached value");
    Ok(None)
}

struct Reader<'a> {
    supervisor: &'a ConnectionSupervisor,
    address: Address,
}

impl Reader<'_> {
    /// A numeric, non-MASK answer to `opcode`, if any.
    async fn query(&self, opcode: Opcode) -> Option<u8> {
        match self.supervisor.send(Command::gear(self.address, opcode)).await {
            Ok(r) => r.level(),
            Err(e) => {
                warn!(address = %self.address, %opcode, error = %e, "query failed");
                None
            }
        }
    }

    async fn limits(&self) -> LevelLimits {
        let defaults = LevelLimits::default();
        let physical_minimum = self.query(Opcode::QueryPhysicalMinimum).await;
        let min_level = self.query(Opcode::QueryMinLevel).await;
        let max_level = self.query(Opcode::QueryMaxLevel).await;
        if physical_minimum.is_none() || min_level.is_none() || max_level.is_none() {
            warn!(address = %self.address, "level limits incomplete, using defaults for missing values");
        }
        LevelLimits::normalised(
            physical_minimum.unwrap_or(defaults.physical_minimum),
            min_level.unwrap_or(defaults.min_level),
            max_level.unwrap_or(defaults.max_level),
        )
    }

    async fn fade(&self) -> Fade {
        // 0xFF is a legitimate packed value here (time 15, rate 15).
        let response = self
            .supervisor
            .send(Command::gear(self.address, Opcode::QueryFadeTimeFadeRate))
            .await;
        match response.ok().and_then(|r| r.value()) {
            Some(raw) => {
                let packed = FadeTimeRate(raw);
                Fade {
                    time: packed.fade_time(),
                    rate: packed.fade_rate(),
                }
            }
            None => {
                warn!(address = %self.address, "fade settings unreadable");
                Fade::default()
            }
        }
    }

    async fn level(&self, policy: &LevelRetryPolicy) -> u8 {
        let status = match self
            .supervisor
            .send(Command::gear(self.address, Opcode::QueryStatus))
            .await
        {
            Ok(r) => r.value().map(GearStatus),
            Err(e) => {
                warn!(address = %self.address, error = %e, "status query failed");
                None
            }
        };
        let Some(status) = status else {
            warn!(address = %self.address, "status unknown, assuming off");
            return 0;
        };
        if !status.lamp_on() {
            return 0;
        }
        if status.fade_running() {
            tokio::time::sleep(policy.fade_wait).await;
        }

        let query = Command::gear(self.address, Opcode::QueryActualLevel);
        let attempts = policy.discovery_attempts();
        for attempt in 0..attempts {
            let response = match self.supervisor.send(query).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(address = %self.address, error = %e, "level query failed");
                    break;
                }
            };
            if let Some(level) = response.level() {
                return level;
            }
            if !response.is_mask() {
                warn!(address = %self.address, ?response, "non-numeric level while on");
                break;
            }
            if let Some(delay) = policy.discovery_delays.get(attempt) {
                debug!(address = %self.address, attempt = attempt + 1, "level in flux, retrying");
                tokio::time::sleep(*delay).await;
            }
        }
        warn!(address = %self.address, level = ASSUMED_ON_LEVEL, "level unreadable while on, assuming full");
        ASSUMED_ON_LEVEL
    }

    async fn colour(&self, value: ColourValue) -> Option<u16> {
        let sequence = Sequence::QueryColourValue {
            address: self.address,
            value,
        };
        match self.supervisor.run_sequence(&sequence).await {
            Ok(v) => v.colour(),
            Err(e) => {
                debug!(address = %self.address, ?value, error = %e, "colour query failed");
                None
            }
        }
    }

    async fn color_temperature(&self) -> Option<ColorTemperature> {
        let coolest = self.colour(ColourValue::TemperatureCoolest).await;
        let warmest = self.colour(ColourValue::TemperatureWarmest).await;
        let current = self.colour(ColourValue::Temperature).await;
        let ct = ColorTemperature::from_readings(coolest, warmest, current);
        if ct.is_none() && (coolest.is_some() || warmest.is_some()) {
            warn!(address = %self.address, ?coolest, ?warmest, ?current, "partial colour temperature support ignored");
        }
        ct
    }

    async fn memory(&self, field: MemoryField) -> Option<Vec<u8>> {
        let sequence = Sequence::ReadMemory {
            address: self.address,
            field,
        };
        match self.supervisor.run_sequence(&sequence).await {
            Ok(v) => v.into_memory().into_iter().collect(),
            Err(e) => {
                debug!(address = %self.address, bank = field.bank, error = %e, "memory read failed");
                None
            }
        }
    }

    async fn metadata(&self) -> DeviceMetadata {
        let mut metadata = DeviceMetadata::default();

        let sequence = Sequence::QueryDeviceTypes {
            address: self.address,
        };
        match self.supervisor.run_sequence(&sequence).await {
            Ok(v) => metadata.device_types = v.into_device_types(),
            Err(e) => warn!(address = %self.address, error = %e, "device type query failed"),
        }
        if let Some(first) = metadata.device_types.first() {
            metadata.device_type = device_type_label(*first);
        }

        metadata.gtin = self.memory(MEMORY_GTIN).await.and_then(|bytes| {
            let gtin = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
            (gtin != 0 && bytes.iter().any(|b| *b != 0xFF)).then(|| gtin.to_string())
        });
        metadata.firmware_version = self
            .memory(MEMORY_FIRMWARE_VERSION)
            .await
            .and_then(|bytes| match bytes.as_slice() {
                [major, minor] => Some(format!("{major}.{minor}")),
                _ => None,
            });
        metadata.luminaire_id = self.memory(MEMORY_LUMINAIRE_ID).await.and_then(|bytes| {
            let text: String = bytes
                .iter()
                .filter(|b| b.is_ascii_graphic() || **b == b' ')
                .map(|b| char::from(*b))
                .collect();
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_owned())
        });
        metadata
    }
}
