// ── Fan-out directory ──
//
// Which individual devices a group or broadcast command reaches. Rebuilt
// whole after every scan and swapped in atomically; never patched.

use std::collections::BTreeSet;

use dali2mqtt_bus::Address;

use crate::scanner::GroupMembers;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutDirectory {
    groups: GroupMembers,
    broadcast: BTreeSet<u8>,
}

impl FanoutDirectory {
    /// Build from a scan. Broadcast covers every live address; groups keep
    /// only members that are live.
    pub fn rebuild(live: &[Address], groups: GroupMembers) -> Self {
        let broadcast: BTreeSet<u8> = live
            .iter()
            .filter_map(|a| match a {
                Address::Individual(id) => Some(*id),
                _ => None,
            })
            .collect();
        let groups = groups
            .into_iter()
            .filter_map(|(group, members)| {
                let members: BTreeSet<u8> = members.intersection(&broadcast).copied().collect();
                (!members.is_empty()).then_some((group, members))
            })
            .collect();
        Self { groups, broadcast }
    }

    /// Individual addresses reached by a command to `address`, ascending.
    /// An individual address reaches only itself.
    pub fn members(&self, address: Address) -> Vec<Address> {
        let ids = match address {
            Address::Individual(_) => return vec![address],
            Address::Group(g) => self.groups.get(&g),
            Address::Broadcast => Some(&self.broadcast),
        };
        ids.into_iter()
            .flatten()
            .map(|id| Address::Individual(*id))
            .collect()
    }

    /// Populated groups, ascending.
    pub fn groups(&self) -> Vec<Address> {
        self.groups.keys().map(|g| Address::Group(*g)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.broadcast.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(ids: &[u8]) -> Vec<Address> {
        ids.iter().map(|id| Address::Individual(*id)).collect()
    }

    #[test]
    fn broadcast_is_union_of_live_addresses() {
        let dir = FanoutDirectory::rebuild(&live(&[1, 4, 7]), GroupMembers::new());
        assert_eq!(dir.members(Address::Broadcast), live(&[1, 4, 7]));
        assert_eq!(dir.members(Address::Individual(4)), live(&[4]));
        assert!(dir.members(Address::Group(0)).is_empty());
    }

    #[test]
    fn stale_members_are_dropped_on_rebuild() {
        let mut groups = GroupMembers::new();
        groups.insert(3, [4, 7, 9].into_iter().collect());
        groups.insert(5, [9].into_iter().collect());
        let dir = FanoutDirectory::rebuild(&live(&[4, 7]), groups);
        assert_eq!(dir.members(Address::Group(3)), live(&[4, 7]));
        assert_eq!(dir.groups(), vec![Address::Group(3)]);
        assert!(!dir.members(Address::Broadcast).contains(&Address::Individual(9)));
    }
}
