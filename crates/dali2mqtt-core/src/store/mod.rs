// ── Reactive device store ──
//
// Concurrent record storage with push-based change notification.

mod collection;
mod device_store;
mod refresh;

pub use device_store::DeviceStore;
pub use refresh::DiscoveryDiff;
