// ── Multi-step sequences ──
//
// Some reads and writes need several forward frames issued back to back
// (loading DTRs, enabling a device type, then querying). A sequence is run
// as one unit by the transport so nothing else is interleaved on the bus.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::address::Address;
use crate::command::{Command, DEVICE_TYPE_COLOUR, Opcode};
use crate::error::Error;
use crate::response::Response;
use crate::transport::BusTransport;

/// QUERY DEVICE TYPE answer meaning "more than one, use QUERY NEXT DEVICE TYPE".
pub const DEVICE_TYPE_MULTIPLE: u8 = 0xFF;

/// QUERY NEXT DEVICE TYPE answer terminating the enumeration.
pub const DEVICE_TYPE_END: u8 = 0xFE;

/// Upper bound on QUERY NEXT DEVICE TYPE round trips.
const MAX_DEVICE_TYPES: usize = 16;

// ── Colour values ───────────────────────────────────────────────────

/// DTR0 selectors for DT8 QUERY COLOUR VALUE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColourValue {
    /// Current colour temperature Tc, in mirek.
    Temperature = 2,
    /// Coolest colour temperature the gear supports.
    TemperatureCoolest = 128,
    /// Warmest colour temperature the gear supports.
    TemperatureWarmest = 130,
}

/// 16-bit colour value meaning "not available".
pub const COLOUR_VALUE_NONE: u16 = 0xFFFF;

// ── Memory banks ────────────────────────────────────────────────────

/// A span of bytes in a gear memory bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryField {
    pub bank: u8,
    pub offset: u8,
    pub len: u8,
}

/// GTIN, 6 bytes big-endian, bank 0.
pub const MEMORY_GTIN: MemoryField = MemoryField {
    bank: 0,
    offset: 0x03,
    len: 6,
};

/// Firmware version major/minor, bank 0.
pub const MEMORY_FIRMWARE_VERSION: MemoryField = MemoryField {
    bank: 0,
    offset: 0x09,
    len: 2,
};

/// Luminaire identification, ASCII, bank 1.
pub const MEMORY_LUMINAIRE_ID: MemoryField = MemoryField {
    bank: 1,
    offset: 0x09,
    len: 8,
};

// ── Sequence ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sequence {
    /// DTR0 ← selector, ENABLE DT8, QUERY COLOUR VALUE (MSB), QUERY CONTENT DTR0 (LSB).
    QueryColourValue { address: Address, value: ColourValue },
    /// DTR0/DTR1 ← mirek, ENABLE DT8, SET TEMPORARY Tc, ENABLE DT8, ACTIVATE.
    SetColourTemperature { address: Address, mirek: u16 },
    /// QUERY DEVICE TYPE, following up with QUERY NEXT DEVICE TYPE when the
    /// gear reports several.
    QueryDeviceTypes { address: Address },
    /// DTR1 ← bank, DTR0 ← offset, then READ MEMORY LOCATION `len` times.
    ReadMemory { address: Address, field: MemoryField },
}

impl Sequence {
    pub fn address(&self) -> Address {
        match self {
            Self::QueryColourValue { address, .. }
            | Self::SetColourTemperature { address, .. }
            | Self::QueryDeviceTypes { address }
            | Self::ReadMemory { address, .. } => *address,
        }
    }
}

/// Result of running a [`Sequence`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceValue {
    /// Colour value; `None` when the gear did not answer or reported 0xFFFF.
    Colour(Option<u16>),
    /// Device types in the order the gear reported them.
    DeviceTypes(Vec<u8>),
    /// One entry per byte read; `None` where the gear gave no answer.
    Memory(Vec<Option<u8>>),
    Done,
}

impl SequenceValue {
    pub fn colour(&self) -> Option<u16> {
        match self {
            Self::Colour(v) => *v,
            _ => None,
        }
    }

    pub fn into_device_types(self) -> Vec<u8> {
        match self {
            Self::DeviceTypes(v) => v,
            _ => Vec::new(),
        }
    }

    pub fn into_memory(self) -> Vec<Option<u8>> {
        match self {
            Self::Memory(v) => v,
            _ => Vec::new(),
        }
    }
}

/// Run `sequence` one frame at a time over `transport`.
///
/// This is the default [`BusTransport::run_sequence`]; interfaces with
/// native sequence support may override it.
pub async fn execute<T>(transport: &T, sequence: &Sequence) -> Result<SequenceValue, Error>
where
    T: BusTransport + ?Sized,
{
    trace!(?sequence, "running sequence");
    match *sequence {
        Sequence::QueryColourValue { address, value } => {
            transport.send(Command::dtr0(value as u8)).await?;
            transport
                .send(Command::enable_device_type(DEVICE_TYPE_COLOUR))
                .await?;
            let msb = transport
                .send(Command::gear(address, Opcode::Dt8QueryColourValue))
                .await?;
            let Some(msb) = msb.value() else {
                return Ok(SequenceValue::Colour(None));
            };
            let lsb = transport
                .send(Command::gear(address, Opcode::QueryContentDtr0))
                .await?;
            let Some(lsb) = lsb.value() else {
                return Ok(SequenceValue::Colour(None));
            };
            let raw = (u16::from(msb) << 8) | u16::from(lsb);
            Ok(SequenceValue::Colour(
                (raw != COLOUR_VALUE_NONE).then_some(raw),
            ))
        }
        Sequence::SetColourTemperature { address, mirek } => {
            let [msb, lsb] = mirek.to_be_bytes();
            transport.send(Command::dtr0(lsb)).await?;
            transport.send(Command::dtr1(msb)).await?;
            transport
                .send(Command::enable_device_type(DEVICE_TYPE_COLOUR))
                .await?;
            transport
                .send(Command::gear(address, Opcode::Dt8SetTemporaryColourTemperature))
                .await?;
            transport
                .send(Command::enable_device_type(DEVICE_TYPE_COLOUR))
                .await?;
            transport
                .send(Command::gear(address, Opcode::Dt8Activate))
                .await?;
            Ok(SequenceValue::Done)
        }
        Sequence::QueryDeviceTypes { address } => {
            let first = transport
                .send(Command::gear(address, Opcode::QueryDeviceType))
                .await?;
            match first {
                Response::Answer(DEVICE_TYPE_MULTIPLE) => {
                    let mut types = Vec::new();
                    while types.len() < MAX_DEVICE_TYPES {
                        let next = transport
                            .send(Command::gear(address, Opcode::QueryNextDeviceType))
                            .await?;
                        match next.value() {
                            Some(DEVICE_TYPE_END) | None => break,
                            Some(dt) => types.push(dt),
                        }
                    }
                    Ok(SequenceValue::DeviceTypes(types))
                }
                Response::Answer(dt) => Ok(SequenceValue::DeviceTypes(vec![dt])),
                Response::NoAnswer | Response::Framing => Ok(SequenceValue::DeviceTypes(Vec::new())),
            }
        }
        Sequence::ReadMemory { address, field } => {
            transport.send(Command::dtr1(field.bank)).await?;
            transport.send(Command::dtr0(field.offset)).await?;
            let mut bytes = Vec::with_capacity(usize::from(field.len));
            for _ in 0..field.len {
                let r = transport
                    .send(Command::gear(address, Opcode::ReadMemoryLocation))
                    .await?;
                bytes.push(r.value());
            }
            Ok(SequenceValue::Memory(bytes))
        }
    }
}

/// Human-readable label for a device type number.
pub fn device_type_label(device_type: u8) -> String {
    let label = match device_type {
        0 => "Fluorescent lamp",
        1 => "Emergency lighting",
        2 => "Discharge lamp",
        3 => "Low voltage halogen lamp",
        4 => "Incandescent lamp dimmer",
        5 => "Conversion into D.C. voltage",
        6 => "LED module",
        7 => "Switching function",
        8 => "Colour control",
        9 => "Sequencer",
        _ => return format!("Device type {device_type}"),
    };
    label.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_type_labels() {
        assert_eq!(device_type_label(6), "LED module");
        assert_eq!(device_type_label(8), "Colour control");
        assert_eq!(device_type_label(49), "Device type 49");
    }

    #[test]
    fn sequence_value_accessors() {
        assert_eq!(SequenceValue::Colour(Some(250)).colour(), Some(250));
        assert_eq!(SequenceValue::Done.colour(), None);
        assert_eq!(
            SequenceValue::DeviceTypes(vec![6, 8]).into_device_types(),
            vec![6, 8]
        );
        assert!(SequenceValue::Done.into_memory().is_empty());
    }
}
