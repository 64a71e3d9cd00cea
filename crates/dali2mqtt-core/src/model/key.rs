// ── Stable device keys ──
//
// A device key is derived from the bus address alone, never from the
// display name, so renaming a light does not orphan its record or topics.

use std::fmt;

use dali2mqtt_bus::Address;
use serde::{Deserialize, Serialize};

const GROUP_PREFIX: &str = "group_";
const BROADCAST: &str = "broadcast";

/// Key used in topics, the device store and the names file.
///
/// - individual: `"<n>"`
/// - group: `"group_<n>"`
/// - broadcast: `"broadcast"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceKey(String);

impl DeviceKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a key back into its address. Rejects anything not produced by
    /// `From<Address>`.
    pub fn parse(raw: &str) -> Option<Address> {
        if raw == BROADCAST {
            return Some(Address::Broadcast);
        }
        if let Some(group) = raw.strip_prefix(GROUP_PREFIX) {
            return group.parse().ok().and_then(|g| Address::group(g).ok());
        }
        // Reject "+1", "01" and similar so keys stay canonical.
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) || (raw.len() > 1 && raw.starts_with('0')) {
            return None;
        }
        raw.parse().ok().and_then(|id| Address::individual(id).ok())
    }

    pub fn address(&self) -> Option<Address> {
        Self::parse(&self.0)
    }

    /// Key under which the display name is stored in the names file.
    /// The broadcast record is filed next to the groups.
    pub fn names_key(&self) -> String {
        if self.0 == BROADCAST {
            format!("{GROUP_PREFIX}{BROADCAST}")
        } else {
            self.0.clone()
        }
    }
}

impl From<Address> for DeviceKey {
    fn from(address: Address) -> Self {
        Self(match address {
            Address::Individual(id) => id.to_string(),
            Address::Group(id) => format!("{GROUP_PREFIX}{id}"),
            Address::Broadcast => BROADCAST.to_owned(),
        })
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Display name used when the names collaborator has nothing for `address`.
pub fn default_name(address: Address) -> String {
    match address {
        Address::Broadcast => "All Lights".to_owned(),
        other => DeviceKey::from(other).0,
    }
}
