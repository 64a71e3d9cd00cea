use serde::{Deserialize, Serialize};

use crate::command::MASK;

/// Status byte bit: lamp arc power is on.
pub const STATUS_LAMP_ON: u8 = 0x04;

/// Status byte bit: a fade is running.
pub const STATUS_FADE_RUNNING: u8 = 0x10;

/// What came back on the bus after a forward frame.
///
/// Timeouts of the interface itself are not responses; they surface as
/// [`Error::Timeout`](crate::Error::Timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Response {
    /// A decodable 8-bit backward frame.
    Answer(u8),
    /// No backward frame. For yes/no queries this means "no".
    NoAnswer,
    /// A backward frame was seen but could not be decoded (collision of
    /// several answering gears, or an unpowered bus).
    Framing,
}

impl Response {
    pub fn value(&self) -> Option<u8> {
        match self {
            Self::Answer(v) => Some(*v),
            _ => None,
        }
    }

    /// A numeric value that is not the MASK sentinel.
    pub fn level(&self) -> Option<u8> {
        self.value().filter(|v| *v != MASK)
    }

    /// Any backward frame on a yes/no query is a "yes".
    pub fn is_yes(&self) -> bool {
        matches!(self, Self::Answer(_))
    }

    /// The gear answered MASK: the value is in flux and cannot be read.
    pub fn is_mask(&self) -> bool {
        matches!(self, Self::Answer(MASK))
    }

    pub fn is_framing_error(&self) -> bool {
        matches!(self, Self::Framing)
    }
}

/// Decoded QUERY STATUS answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GearStatus(pub u8);

impl GearStatus {
    pub fn lamp_on(self) -> bool {
        self.0 & STATUS_LAMP_ON != 0
    }

    pub fn fade_running(self) -> bool {
        self.0 & STATUS_FADE_RUNNING != 0
    }
}

/// Decoded QUERY FADE TIME/FADE RATE answer: fade time in the high nibble,
/// fade rate in the low nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeTimeRate(pub u8);

impl FadeTimeRate {
    pub fn fade_time(self) -> u8 {
        self.0 >> 4
    }

    pub fn fade_rate(self) -> u8 {
        self.0 & 0x0F
    }

    pub fn pack(fade_time: u8, fade_rate: u8) -> Self {
        Self(((fade_time & 0x0F) << 4) | (fade_rate & 0x0F))
    }
}
