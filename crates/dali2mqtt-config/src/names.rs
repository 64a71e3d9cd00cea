// ── Device names file ──
//
// YAML mapping of names-key to `{ friendly_name }`. Entries are only ever
// added by the bridge; names edited by hand survive every rediscovery.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use dali2mqtt_core::{CoreError, DeviceKey, DeviceNames};

use crate::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameEntry {
    pub friendly_name: String,
}

/// Friendly names backed by a YAML file.
#[derive(Debug)]
pub struct DevicesNames {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, NameEntry>>,
}

impl DevicesNames {
    /// Read `path`, creating it empty when it does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_yaml::from_str::<Option<BTreeMap<String, NameEntry>>>(&raw)
                .map_err(|source| ConfigError::Names {
                    path: path.clone(),
                    source,
                })?
                .unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "creating empty device names file");
                write_file(&path, &BTreeMap::new())?;
                BTreeMap::new()
            }
            Err(e) => return Err(ConfigError::io(&path, e)),
        };
        debug!(path = %path.display(), entries = entries.len(), "device names loaded");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Friendly name stored under a names-key (`"7"`, `"group_3"`, `"group_broadcast"`).
    pub fn get(&self, names_key: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(names_key)
            .map(|e| e.friendly_name.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add entries whose key is not yet present and write the file if
    /// anything changed. The in-memory table is updated even when the write
    /// fails. Returns the number of entries added.
    pub fn merge<'a>(
        &self,
        entries: impl IntoIterator<Item = (String, &'a str)>,
    ) -> Result<usize, ConfigError> {
        let mut table = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut added = 0;
        for (key, name) in entries {
            table.entry(key).or_insert_with(|| {
                added += 1;
                NameEntry {
                    friendly_name: name.to_owned(),
                }
            });
        }
        if added > 0 {
            write_file(&self.path, &table)?;
            debug!(added, "device names file updated");
        }
        Ok(added)
    }
}

fn write_file(path: &Path, table: &BTreeMap<String, NameEntry>) -> Result<(), ConfigError> {
    let yaml = if table.is_empty() {
        String::from("{}\n")
    } else {
        serde_yaml::to_string(table).map_err(|source| ConfigError::Names {
            path: path.to_path_buf(),
            source,
        })?
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
    }
    std::fs::write(path, yaml).map_err(|e| ConfigError::io(path, e))
}

impl DeviceNames for DevicesNames {
    fn name(&self, key: &DeviceKey) -> Option<String> {
        self.get(&key.names_key())
    }

    fn register(&self, entries: &[(DeviceKey, String)]) -> Result<(), CoreError> {
        self.merge(entries.iter().map(|(k, n)| (k.names_key(), n.as_str())))
            .map(|_| ())
            .map_err(|e| CoreError::Internal(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use dali2mqtt_bus::Address;
    use pretty_assertions::assert_eq;

    fn key(address: Address) -> DeviceKey {
        DeviceKey::from(address)
    }

    #[test]
    fn missing_file_is_created_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names").join("devices.yaml");

        let names = DevicesNames::load(&path).unwrap();
        assert!(names.is_empty());
        assert!(path.exists());
        assert!(DevicesNames::load(&path).unwrap().is_empty());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.yaml");
        std::fs::write(&path, "4: [unterminated").unwrap();

        assert!(matches!(DevicesNames::load(&path), Err(ConfigError::Names { .. })));
    }

    #[test]
    fn merge_keeps_custom_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.yaml");
        std::fs::write(&path, "\"4\":\n  friendly_name: Kitchen\n").unwrap();
        let names = DevicesNames::load(&path).unwrap();

        names
            .register(&[
                (key(Address::Individual(4)), "4".into()),
                (key(Address::Group(3)), "group_3".into()),
                (key(Address::Broadcast), "All Lights".into()),
            ])
            .unwrap();

        assert_eq!(names.name(&key(Address::Individual(4))).as_deref(), Some("Kitchen"));
        assert_eq!(names.name(&key(Address::Group(3))).as_deref(), Some("group_3"));
        assert_eq!(names.get("group_broadcast").as_deref(), Some("All Lights"));

        let reloaded = DevicesNames::load(&path).unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(reloaded.get("4").as_deref(), Some("Kitchen"));
    }

    #[test]
    fn unchanged_merge_does_not_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.yaml");
        let names = DevicesNames::load(&path).unwrap();

        assert_eq!(names.merge([("7".to_owned(), "7")]).unwrap(), 1);
        assert_eq!(names.merge([("7".to_owned(), "other")]).unwrap(), 0);
        assert_eq!(names.get("7").as_deref(), Some("7"));
    }

    #[test]
    fn unknown_key_has_no_name() {
        let dir = tempfile::tempdir().unwrap();
        let names = DevicesNames::load(dir.path().join("devices.yaml")).unwrap();
        assert_eq!(names.name(&key(Address::Individual(9))), None);
    }
}
