// ── Discovery application ──
//
// Applies the result of a full discovery pass to the store.

use std::collections::HashSet;

use chrono::Utc;
use dali2mqtt_bus::Address;
use tracing::info;

use super::DeviceStore;
use crate::model::DeviceRecord;

/// Addresses that appeared or disappeared with a discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryDiff {
    pub added: Vec<Address>,
    pub removed: Vec<Address>,
}

impl DeviceStore {
    /// Replace the record set with a fresh discovery result.
    ///
    /// Upsert-then-prune: incoming records are upserted first, then any
    /// address not in the incoming set is removed, so subscribers never
    /// see a transient empty store. For addresses that were already known
    /// the live fields (level, last active level, current colour
    /// temperature) are carried over from the existing record.
    pub fn apply_discovery(&self, records: Vec<DeviceRecord>) -> DiscoveryDiff {
        let incoming: HashSet<Address> = records.iter().map(|r| r.address).collect();
        let mut diff = DiscoveryDiff::default();

        for mut record in records {
            let address = record.address;
            match self.records.get(&address) {
                Some(existing) => {
                    record.level = existing.level;
                    record.last_active_level = existing.last_active_level;
                    if let (Some(ct), Some(old)) =
                        (record.color_temperature.as_mut(), existing.color_temperature)
                    {
                        if (ct.coolest..=ct.warmest).contains(&old.current) {
                            ct.current = old.current;
                        }
                    }
                }
                None => diff.added.push(address),
            }
            self.records.upsert(address, record);
        }

        for existing in self.records.keys() {
            if !incoming.contains(&existing) {
                self.records.remove(&existing);
                diff.removed.push(existing);
            }
        }

        self.last_discovery.send_replace(Some(Utc::now()));
        info!(
            records = self.records.len(),
            added = diff.added.len(),
            removed = diff.removed.len(),
            "discovery applied"
        );
        diff
    }
}
