// ── Device store ──
//
// One record per individual address, populated group and the broadcast
// target. Mutations are broadcast to subscribers via `watch` channels.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dali2mqtt_bus::Address;
use tokio::sync::watch;

use super::collection::Collection;
use crate::model::DeviceRecord;

pub struct DeviceStore {
    pub(super) records: Collection<Address, DeviceRecord>,
    pub(super) last_discovery: watch::Sender<Option<DateTime<Utc>>>,
}

impl DeviceStore {
    pub fn new() -> Self {
        let (last_discovery, _) = watch::channel(None);
        Self {
            records: Collection::new(),
            last_discovery,
        }
    }

    // ── Lookups ──────────────────────────────────────────────────────

    pub fn get(&self, address: Address) -> Option<Arc<DeviceRecord>> {
        self.records.get(&address)
    }

    pub fn contains(&self, address: Address) -> bool {
        self.records.contains(&address)
    }

    /// All records ordered by address: individuals, then groups, then
    /// broadcast.
    pub fn snapshot(&self) -> Arc<Vec<Arc<DeviceRecord>>> {
        self.records.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<DeviceRecord>>>> {
        self.records.subscribe()
    }


    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.len() == 0
    }

    pub fn version(&self) -> u64 {
        self.records.version()
    }

    pub fn last_discovery(&self) -> Option<DateTime<Utc>> {
        *self.last_discovery.borrow()
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Apply `f` to the record for `address`. Returns the updated record,
    /// or `None` if there is no such record.
    pub fn update(
        &self,
        address: Address,
        f: impl FnOnce(&mut DeviceRecord),
    ) -> Option<Arc<DeviceRecord>> {
        self.records.modify(&address, f)
    }
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}
