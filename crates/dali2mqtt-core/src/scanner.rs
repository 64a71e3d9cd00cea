// ── Device scanner ──
//
// Enumerates live individual addresses and their group memberships.
// Per-address failures are expected and cheap: they drop that address (or
// its memberships) and the pass carries on. Only a lost connection aborts
// a pass, so a dead link never looks like an empty bus.

use std::collections::{BTreeMap, BTreeSet};

use dali2mqtt_bus::{Address, Command, Opcode};
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::supervisor::ConnectionSupervisor;

/// Group id -> individual ids.
pub type GroupMembers = BTreeMap<u8, BTreeSet<u8>>;

/// Probe every individual address in ascending order.
///
/// An address is accepted only when QUERY CONTROL GEAR PRESENT answers and
/// QUERY PHYSICAL MINIMUM then returns a value. The second query rejects
/// spurious presence answers caused by bus noise.
pub async fn scan(supervisor: &ConnectionSupervisor) -> Result<Vec<Address>, CoreError> {
    let mut found = Vec::new();
    for address in Address::all_individual() {
        match supervisor
            .send(Command::gear(address, Opcode::QueryControlGearPresent))
            .await
        {
            Ok(r) if r.is_yes() => {}
            Ok(_) => continue,
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => {
                debug!(%address, error = %e, "no presence answer");
                continue;
            }
        }

        match confirm(supervisor, address).await {
            Ok(()) => {
                debug!(%address, "gear found");
                found.push(address);
            }
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => warn!(error = %e, "dropping address from scan"),
        }
    }
    info!(count = found.len(), "bus scan complete");
    Ok(found)
}

async fn confirm(supervisor: &ConnectionSupervisor, address: Address) -> Result<(), CoreError> {
    let response = supervisor
        .send(Command::gear(address, Opcode::QueryPhysicalMinimum))
        .await;
    match response {
        Ok(r) if r.value().is_some() => Ok(()),
        Err(e) if e.is_connectivity() => Err(e),
        _ => Err(CoreError::ScanConfirmationFailed { address }),
    }
}

/// Read both group bitmasks of every live address.
///
/// Bit `i` of the first mask is group `i`, bit `i` of the second is group
/// `i + 8`. A device whose masks cannot be read joins no group.
pub async fn scan_groups(
    supervisor: &ConnectionSupervisor,
    live: &[Address],
) -> Result<GroupMembers, CoreError> {
    let mut groups = GroupMembers::new();
    for &address in live {
        let Address::Individual(id) = address else {
            continue;
        };
        let mask = match read_group_mask(supervisor, address).await {
            Ok(Some(mask)) => mask,
            Ok(None) => {
                warn!(%address, "group masks unreadable, device joins no group");
                continue;
            }
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => {
                warn!(%address, error = %e, "group query failed, device joins no group");
                continue;
            }
        };
        for group in (0..16u8).filter(|g| mask & (1 << g) != 0) {
            groups.entry(group).or_default().insert(id);
        }
    }
    debug!(groups = groups.len(), "group scan complete");
    Ok(groups)
}

async fn read_group_mask(
    supervisor: &ConnectionSupervisor,
    address: Address,
) -> Result<Option<u16>, CoreError> {
    let low = supervisor
        .send(Command::gear(address, Opcode::QueryGroupsZeroToSeven))
        .await?;
    let high = supervisor
        .send(Command::gear(address, Opcode::QueryGroupsEightToFifteen))
        .await?;
    Ok(match (low.value(), high.value()) {
        (Some(low), Some(high)) => Some(u16::from_le_bytes([low, high])),
        _ => None,
    })
}
