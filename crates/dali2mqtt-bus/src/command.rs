// ── Gear commands ──
//
// Typed forward frames for the subset of IEC 62386-102/209 the bridge uses.
// Encoding follows the 16-bit forward frame layout: an address byte (with
// the selector bit) followed by an opcode, or for special commands a fixed
// first byte followed by a data byte.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};

use crate::address::Address;

/// Arc power level meaning "stop fading, keep current level".
pub const MASK: u8 = 0xFF;

/// Highest arc power level a gear can be commanded to.
pub const MAX_LEVEL: u8 = 254;

/// Device type number of colour control gear (IEC 62386-209).
pub const DEVICE_TYPE_COLOUR: u8 = 8;

// ── Opcode ──────────────────────────────────────────────────────────

/// Addressed gear opcodes (selector bit set).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Opcode {
    Off = 0x00,
    SetFadeTime = 0x2E,
    SetFadeRate = 0x2F,
    QueryStatus = 0x90,
    QueryControlGearPresent = 0x91,
    QueryContentDtr0 = 0x98,
    QueryDeviceType = 0x99,
    QueryPhysicalMinimum = 0x9A,
    QueryContentDtr1 = 0x9C,
    QueryActualLevel = 0xA0,
    QueryMaxLevel = 0xA1,
    QueryMinLevel = 0xA2,
    QueryFadeTimeFadeRate = 0xA5,
    QueryNextDeviceType = 0xA7,
    QueryGroupsZeroToSeven = 0xC0,
    QueryGroupsEightToFifteen = 0xC1,
    ReadMemoryLocation = 0xC5,
    // DT8 application extended commands; only valid right after
    // ENABLE DEVICE TYPE 8.
    Dt8Activate = 0xE2,
    Dt8SetTemporaryColourTemperature = 0xE7,
    Dt8QueryColourValue = 0xFA,
}

impl Opcode {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Queries produce a backward frame; everything else is fire-and-forget.
    pub fn is_query(self) -> bool {
        matches!(
            self,
            Self::QueryStatus
                | Self::QueryControlGearPresent
                | Self::QueryContentDtr0
                | Self::QueryDeviceType
                | Self::QueryPhysicalMinimum
                | Self::QueryContentDtr1
                | Self::QueryActualLevel
                | Self::QueryMaxLevel
                | Self::QueryMinLevel
                | Self::QueryFadeTimeFadeRate
                | Self::QueryNextDeviceType
                | Self::QueryGroupsZeroToSeven
                | Self::QueryGroupsEightToFifteen
                | Self::ReadMemoryLocation
                | Self::Dt8QueryColourValue
        )
    }

    /// Configuration commands only take effect when received twice within
    /// 100 ms.
    pub fn is_config(self) -> bool {
        matches!(self, Self::SetFadeTime | Self::SetFadeRate)
    }

    /// Device type that must be enabled right before this opcode, if any.
    pub fn required_device_type(self) -> Option<u8> {
        match self {
            Self::Dt8Activate | Self::Dt8SetTemporaryColourTemperature | Self::Dt8QueryColourValue => {
                Some(DEVICE_TYPE_COLOUR)
            }
            _ => None,
        }
    }
}

// ── Special commands ────────────────────────────────────────────────

/// Broadcast-style special commands that load data registers or prefix an
/// extended command. They carry data instead of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Special {
    Dtr0(u8),
    Dtr1(u8),
    EnableDeviceType(u8),
}

impl Special {
    fn frame(self) -> [u8; 2] {
        match self {
            Self::Dtr0(v) => [0xA3, v],
            Self::EnableDeviceType(v) => [0xC1, v],
            Self::Dtr1(v) => [0xC3, v],
        }
    }
}

// ── Command ─────────────────────────────────────────────────────────

/// A single forward frame sent to control gear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Direct arc power control: fade to `level` using the gear's fade time.
    Arc { address: Address, level: u8 },
    /// An addressed opcode.
    Gear { address: Address, opcode: Opcode },
    /// A special command with no target address.
    Special(Special),
}

impl Command {
    pub fn arc(address: Address, level: u8) -> Self {
        Self::Arc { address, level }
    }

    pub fn gear(address: Address, opcode: Opcode) -> Self {
        Self::Gear { address, opcode }
    }

    pub fn off(address: Address) -> Self {
        Self::gear(address, Opcode::Off)
    }

    pub fn dtr0(value: u8) -> Self {
        Self::Special(Special::Dtr0(value))
    }

    pub fn dtr1(value: u8) -> Self {
        Self::Special(Special::Dtr1(value))
    }

    pub fn enable_device_type(device_type: u8) -> Self {
        Self::Special(Special::EnableDeviceType(device_type))
    }

    /// The addressed target, `None` for special commands.
    pub fn address(&self) -> Option<Address> {
        match self {
            Self::Arc { address, .. } | Self::Gear { address, .. } => Some(*address),
            Self::Special(_) => None,
        }
    }

    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            Self::Gear { opcode, .. } => Some(*opcode),
            _ => None,
        }
    }

    pub fn expects_answer(&self) -> bool {
        self.opcode().is_some_and(Opcode::is_query)
    }

    /// Whether the transport must repeat this frame for it to take effect.
    pub fn send_twice(&self) -> bool {
        self.opcode().is_some_and(Opcode::is_config)
    }

    /// The 16-bit forward frame as `[first, second]`.
    pub fn frame(&self) -> [u8; 2] {
        match *self {
            Self::Arc { address, level } => [address.frame_byte(false), level],
            Self::Gear { address, opcode } => [address.frame_byte(true), opcode.code()],
            Self::Special(special) => special.frame(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arc { address, level } => write!(f, "DAPC({address}, {level})"),
            Self::Gear { address, opcode } => write!(f, "{opcode}({address})"),
            Self::Special(Special::Dtr0(v)) => write!(f, "DTR0({v})"),
            Self::Special(Special::Dtr1(v)) => write!(f, "DTR1({v})"),
            Self::Special(Special::EnableDeviceType(v)) => write!(f, "ENABLE_DEVICE_TYPE({v})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arc_frame_clears_selector() {
        let cmd = Command::arc(Address::Individual(4), 128);
        assert_eq!(cmd.frame(), [0x08, 128]);
        assert!(!cmd.expects_answer());
    }

    #[test]
    fn gear_frame_sets_selector() {
        let cmd = Command::gear(Address::Group(3), Opcode::Off);
        assert_eq!(cmd.frame(), [0x87, 0x00]);

        let cmd = Command::gear(Address::Individual(1), Opcode::QueryActualLevel);
        assert_eq!(cmd.frame(), [0x03, 0xA0]);
        assert!(cmd.expects_answer());
    }

    #[test]
    fn special_frames() {
        assert_eq!(Command::dtr0(7).frame(), [0xA3, 7]);
        assert_eq!(Command::dtr1(1).frame(), [0xC3, 1]);
        assert_eq!(Command::enable_device_type(8).frame(), [0xC1, 8]);
        assert_eq!(Command::dtr0(0).address(), None);
    }

    #[test]
    fn config_commands_are_sent_twice() {
        assert!(Command::gear(Address::Broadcast, Opcode::SetFadeTime).send_twice());
        assert!(Command::gear(Address::Broadcast, Opcode::SetFadeRate).send_twice());
        assert!(!Command::off(Address::Broadcast).send_twice());
    }

    #[test]
    fn dt8_opcodes_require_enable() {
        assert_eq!(
            Opcode::Dt8QueryColourValue.required_device_type(),
            Some(DEVICE_TYPE_COLOUR)
        );
        assert_eq!(Opcode::QueryStatus.required_device_type(), None);
    }

    #[test]
    fn display_is_readable() {
        assert_eq!(
            Command::gear(Address::Individual(2), Opcode::QueryStatus).to_string(),
            "QUERY_STATUS(A2)"
        );
        assert_eq!(Command::arc(Address::Broadcast, 0).to_string(), "DAPC(broadcast, 0)");
    }
}
