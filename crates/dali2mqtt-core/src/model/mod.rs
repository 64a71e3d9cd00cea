// ── Domain model ──
//
// Records for every addressable target on the bus, keyed by a stable key
// derived from the address.

pub mod device;
pub mod key;

pub use device::{
    ColorTemperature, DeviceMetadata, DeviceRecord, Fade, LevelLimits, LifecycleState, MAX_FADE,
};
pub use key::{DeviceKey, default_name};
