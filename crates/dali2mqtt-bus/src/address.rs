// ── Bus addressing ──
//
// The three addressing modes of a DALI bus. Individual and group ids are
// range-checked at construction so an `Address` is always encodable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest individual (short) address on a bus.
pub const MAX_SHORT_ADDRESS: u8 = 63;

/// Highest group number on a bus.
pub const MAX_GROUP: u8 = 15;

/// Rejected address construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("short address {0} out of range 0..={MAX_SHORT_ADDRESS}")]
    ShortOutOfRange(u8),

    #[error("group {0} out of range 0..={MAX_GROUP}")]
    GroupOutOfRange(u8),

    #[error("unrecognised address '{0}'")]
    Unparseable(String),
}

/// A target on the bus.
///
/// Group and broadcast addresses are write-mostly: the bus delivers a
/// command to every member, but a query sent to them has no single answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Address {
    Individual(u8),
    Group(u8),
    Broadcast,
}

impl Address {
    pub fn individual(id: u8) -> Result<Self, AddressError> {
        if id > MAX_SHORT_ADDRESS {
            return Err(AddressError::ShortOutOfRange(id));
        }
        Ok(Self::Individual(id))
    }

    pub fn group(id: u8) -> Result<Self, AddressError> {
        if id > MAX_GROUP {
            return Err(AddressError::GroupOutOfRange(id));
        }
        Ok(Self::Group(id))
    }

    /// Every individual address in ascending order.
    pub fn all_individual() -> impl Iterator<Item = Self> {
        (0..=MAX_SHORT_ADDRESS).map(Self::Individual)
    }

    /// Only individual addresses can answer queries.
    pub fn is_queryable(&self) -> bool {
        matches!(self, Self::Individual(_))
    }

    /// First byte of a forward frame addressed here.
    ///
    /// `selector` distinguishes a command opcode (`true`) from a direct arc
    /// power level (`false`) in the second byte.
    ///
    /// - individual: `0AAAAAAS`
    /// - group:      `100GGGGS`
    /// - broadcast:  `1111111S`
    pub fn frame_byte(&self, selector: bool) -> u8 {
        let s = u8::from(selector);
        match *self {
            Self::Individual(id) => ((id & 0x3F) << 1) | s,
            Self::Group(id) => 0x80 | ((id & 0x0F) << 1) | s,
            Self::Broadcast => 0xFE | s,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Individual(id) => write!(f, "A{id}"),
            Self::Group(id) => write!(f, "G{id}"),
            Self::Broadcast => f.write_str("broadcast"),
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    /// Accepts the `Display` forms (`A3`, `G7`, `broadcast`) as well as a
    /// bare number for an individual address.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("broadcast") {
            return Ok(Self::Broadcast);
        }
        let unparseable = || AddressError::Unparseable(s.to_owned());
        if let Some(rest) = s.strip_prefix(['G', 'g']) {
            return Self::group(rest.parse().map_err(|_| unparseable())?);
        }
        let digits = s.strip_prefix(['A', 'a']).unwrap_or(s);
        Self::individual(digits.parse().map_err(|_| unparseable())?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn construction_is_range_checked() {
        assert!(Address::individual(63).is_ok());
        assert_eq!(
            Address::individual(64),
            Err(AddressError::ShortOutOfRange(64))
        );
        assert!(Address::group(15).is_ok());
        assert_eq!(Address::group(16), Err(AddressError::GroupOutOfRange(16)));
    }

    #[test]
    fn frame_byte_encoding() {
        assert_eq!(Address::Individual(0).frame_byte(false), 0x00);
        assert_eq!(Address::Individual(5).frame_byte(true), 0x0B);
        assert_eq!(Address::Individual(63).frame_byte(true), 0x7F);
        assert_eq!(Address::Group(0).frame_byte(false), 0x80);
        assert_eq!(Address::Group(3).frame_byte(true), 0x87);
        assert_eq!(Address::Group(15).frame_byte(true), 0x9F);
        assert_eq!(Address::Broadcast.frame_byte(false), 0xFE);
        assert_eq!(Address::Broadcast.frame_byte(true), 0xFF);
    }

    #[test]
    fn all_individual_is_ascending_and_complete() {
        let all: Vec<Address> = Address::all_individual().collect();
        assert_eq!(all.len(), 64);
        assert_eq!(all.first(), Some(&Address::Individual(0)));
        assert_eq!(all.last(), Some(&Address::Individual(63)));
        assert!(all.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn parse_display_forms() {
        assert_eq!("A12".parse::<Address>().unwrap(), Address::Individual(12));
        assert_eq!("12".parse::<Address>().unwrap(), Address::Individual(12));
        assert_eq!("g4".parse::<Address>().unwrap(), Address::Group(4));
        assert_eq!(
            "Broadcast".parse::<Address>().unwrap(),
            Address::Broadcast
        );
        assert!("G16".parse::<Address>().is_err());
        assert!("lamp".parse::<Address>().is_err());
    }

    #[test]
    fn only_individual_is_queryable() {
        assert!(Address::Individual(1).is_queryable());
        assert!(!Address::Group(1).is_queryable());
        assert!(!Address::Broadcast.is_queryable());
    }
}
