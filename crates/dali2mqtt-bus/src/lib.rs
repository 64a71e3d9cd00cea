// dali2mqtt-bus: DALI addressing, gear commands, sequences and the transport boundary

pub mod address;
pub mod command;
pub mod error;
pub mod response;
pub mod sequence;
pub mod sim;
pub mod transport;

pub use address::{Address, AddressError};
pub use command::{Command, MASK, MAX_LEVEL, Opcode, Special};
pub use error::Error;
pub use response::{FadeTimeRate, GearStatus, Response};
pub use sequence::{ColourValue, MemoryField, Sequence, SequenceValue};
pub use sim::{SimulatedBus, VirtualColour, VirtualGear};
pub use transport::BusTransport;
