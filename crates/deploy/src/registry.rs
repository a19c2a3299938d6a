//! Per-network address registry.
//!
//! The registry is the source of truth for "has this contract already been
//! deployed on this network". Each network has its own store holding a JSON
//! object that maps a contract name (or label) to its deployed address:
//!
//! ```json
//! {
//!   "Hub": "0x5FbDB2315678afecb367f032d93F642f64180aa3",
//!   "USDC": "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512"
//! }
//! ```
//!
//! Writes are read-merge-write. There is no locking: a single writer per
//! network store is assumed.

use std::{
    collections::{BTreeMap, HashMap},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use alloy_core::primitives::Address;
use derive_more::{Deref, DerefMut, From};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::RegistryError;

/// Addresses recorded for a single network, keyed by contract name or label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Deref, DerefMut, From)]
#[serde(transparent)]
pub struct NetworkAddresses(BTreeMap<String, Address>);

impl NetworkAddresses {
    /// Look up the address recorded under `key`.
    pub fn address(&self, key: &str) -> Option<Address> {
        self.0.get(key).copied()
    }
}

/// Storage backend for the registry.
pub trait RegistryStore: Send + Sync {
    /// Load the addresses for `network`. A network without a store yields an empty map.
    fn load(&self, network: &str) -> Result<NetworkAddresses, RegistryError>;

    /// Replace the stored addresses for `network`.
    fn save(&self, network: &str, addresses: &NetworkAddresses) -> Result<(), RegistryError>;
}

/// File-backed store: one `<network>.json` file per network inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory holding the per-network files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `network`.
    pub fn path_for(&self, network: &str) -> Result<PathBuf, RegistryError> {
        validate_network(network)?;
        Ok(self.dir.join(format!("{network}.json")))
    }
}

impl RegistryStore for FileStore {
    fn load(&self, network: &str) -> Result<NetworkAddresses, RegistryError> {
        let path = self.path_for(network)?;
        if !path.exists() {
            tracing::debug!(network, path = %path.display(), "No registry file yet");
            return Ok(NetworkAddresses::default());
        }

        let read_err = |reason: String| RegistryError::Read {
            network: network.to_string(),
            reason,
        };

        let content = std::fs::read_to_string(&path)
            .map_err(|e| read_err(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&content).map_err(|e| read_err(format!("{}: {e}", path.display())))
    }

    fn save(&self, network: &str, addresses: &NetworkAddresses) -> Result<(), RegistryError> {
        let path = self.path_for(network)?;
        let write_err = |reason: String| RegistryError::Write {
            network: network.to_string(),
            reason,
        };

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| write_err(format!("{}: {e}", self.dir.display())))?;

        // Write to a sibling temp file and rename it over the old one so a crash
        // mid-write never leaves a truncated registry behind.
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| write_err(e.to_string()))?;
        serde_json::to_writer_pretty(&mut tmp, addresses).map_err(|e| write_err(e.to_string()))?;
        tmp.write_all(b"\n").map_err(|e| write_err(e.to_string()))?;
        tmp.persist(&path)
            .map_err(|e| write_err(format!("{}: {e}", path.display())))?;

        Ok(())
    }
}

/// In-memory store used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    networks: Arc<Mutex<HashMap<String, NetworkAddresses>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `addresses` for `network`.
    pub fn seeded(network: &str, addresses: NetworkAddresses) -> Self {
        let store = Self::default();
        store
            .networks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(network.to_string(), addresses);
        store
    }
}

impl RegistryStore for MemoryStore {
    fn load(&self, network: &str) -> Result<NetworkAddresses, RegistryError> {
        validate_network(network)?;
        let networks = self
            .networks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(networks.get(network).cloned().unwrap_or_default())
    }

    fn save(&self, network: &str, addresses: &NetworkAddresses) -> Result<(), RegistryError> {
        validate_network(network)?;
        self.networks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(network.to_string(), addresses.clone());
        Ok(())
    }
}

/// Reads through to another store; writes stay in memory.
struct OverlayStore {
    base: Arc<dyn RegistryStore>,
    writes: MemoryStore,
}

impl RegistryStore for OverlayStore {
    fn load(&self, network: &str) -> Result<NetworkAddresses, RegistryError> {
        validate_network(network)?;
        let written = self
            .writes
            .networks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(network)
            .cloned();
        match written {
            Some(addresses) => Ok(addresses),
            None => self.base.load(network),
        }
    }

    fn save(&self, network: &str, addresses: &NetworkAddresses) -> Result<(), RegistryError> {
        self.writes.save(network, addresses)
    }
}

/// Handle to the address registry, shared by the deployers and the plan executor.
#[derive(Clone)]
pub struct AddressRegistry {
    store: Arc<dyn RegistryStore>,
}

impl std::fmt::Debug for AddressRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressRegistry").finish_non_exhaustive()
    }
}

impl AddressRegistry {
    pub fn new(store: impl RegistryStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Registry backed by `<dir>/<network>.json` files.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(FileStore::new(dir))
    }

    /// Registry that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// A registry that sees every current entry but keeps its own writes in memory.
    pub fn overlay(&self) -> Self {
        Self::new(OverlayStore {
            base: self.store.clone(),
            writes: MemoryStore::new(),
        })
    }

    /// All addresses recorded for `network`. Empty if nothing was deployed there yet.
    pub fn get(&self, network: &str) -> Result<NetworkAddresses, RegistryError> {
        self.store.load(network)
    }

    /// The address recorded under `key` on `network`, if any.
    pub fn lookup(&self, network: &str, key: &str) -> Result<Option<Address>, RegistryError> {
        Ok(self.get(network)?.address(key))
    }

    /// Merge a single entry into the store for `network`, keeping every other entry.
    ///
    /// Writing an existing key overwrites it (last write wins).
    pub fn set(&self, network: &str, key: &str, address: Address) -> Result<(), RegistryError> {
        let mut addresses = self.store.load(network)?;
        let previous = addresses.insert(key.to_string(), address);
        self.store.save(network, &addresses)?;

        match previous {
            Some(previous) if previous != address => {
                tracing::warn!(network, key, %previous, %address, "Registry entry overwritten");
            }
            _ => tracing::debug!(network, key, %address, "Registry entry recorded"),
        }

        Ok(())
    }
}

/// Network names become file names, so keep them to a safe character set.
fn validate_network(network: &str) -> Result<(), RegistryError> {
    let valid = !network.is_empty()
        && network
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !network.starts_with('.');

    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidNetwork(network.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::address;
    use tempdir::TempDir;

    const HUB: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
    const USDC: Address = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");

    #[test]
    fn test_get_unknown_network_is_empty() {
        let temp_dir = TempDir::new("hubspoke-registry").expect("Failed to create temp dir");
        let registry = AddressRegistry::in_dir(temp_dir.path());

        let addresses = registry.get("baseSepolia").expect("get should not fail");
        assert!(addresses.is_empty());
    }

    #[test]
    fn test_set_merges_entries() {
        let temp_dir = TempDir::new("hubspoke-registry").expect("Failed to create temp dir");
        let registry = AddressRegistry::in_dir(temp_dir.path());

        registry.set("baseSepolia", "Hub", HUB).unwrap();
        registry.set("baseSepolia", "USDC", USDC).unwrap();

        let addresses = registry.get("baseSepolia").unwrap();
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses.address("Hub"), Some(HUB));
        assert_eq!(addresses.address("USDC"), Some(USDC));
    }

    #[test]
    fn test_set_last_write_wins() {
        let registry = AddressRegistry::in_memory();

        registry.set("sepolia", "ZUSD", HUB).unwrap();
        registry.set("sepolia", "ZUSD", USDC).unwrap();

        let addresses = registry.get("sepolia").unwrap();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses.address("ZUSD"), Some(USDC));
    }

    #[test]
    fn test_set_is_idempotent() {
        let registry = AddressRegistry::in_memory();

        registry.set("sepolia", "ZUSD", HUB).unwrap();
        registry.set("sepolia", "ZUSD", HUB).unwrap();

        assert_eq!(registry.lookup("sepolia", "ZUSD").unwrap(), Some(HUB));
    }

    #[test]
    fn test_networks_are_isolated() {
        let temp_dir = TempDir::new("hubspoke-registry").expect("Failed to create temp dir");
        let registry = AddressRegistry::in_dir(temp_dir.path());

        registry.set("opSepolia", "Spoke", HUB).unwrap();
        registry.set("arbitrumSepolia", "Spoke", USDC).unwrap();

        assert_eq!(registry.lookup("opSepolia", "Spoke").unwrap(), Some(HUB));
        assert_eq!(registry.lookup("arbitrumSepolia", "Spoke").unwrap(), Some(USDC));
        assert!(temp_dir.path().join("opSepolia.json").exists());
        assert!(temp_dir.path().join("arbitrumSepolia.json").exists());
    }

    #[test]
    fn test_file_layout_is_plain_json_object() {
        let temp_dir = TempDir::new("hubspoke-registry").expect("Failed to create temp dir");
        let registry = AddressRegistry::in_dir(temp_dir.path());

        registry.set("sepolia", "Hub", HUB).unwrap();

        let content = std::fs::read_to_string(temp_dir.path().join("sepolia.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        let hub = value["Hub"].as_str().expect("Hub should be a string");
        assert_eq!(hub.to_lowercase(), "0x5fbdb2315678afecb367f032d93f642f64180aa3");
    }

    #[test]
    fn test_reads_existing_file() {
        let temp_dir = TempDir::new("hubspoke-registry").expect("Failed to create temp dir");
        std::fs::write(
            temp_dir.path().join("sepolia.json"),
            r#"{"ZUSD":"0x5fbdb2315678afecb367f032d93f642f64180aa3"}"#,
        )
        .unwrap();

        let registry = AddressRegistry::in_dir(temp_dir.path());
        assert_eq!(registry.lookup("sepolia", "ZUSD").unwrap(), Some(HUB));
    }

    #[test]
    fn test_corrupt_file_is_a_read_error() {
        let temp_dir = TempDir::new("hubspoke-registry").expect("Failed to create temp dir");
        std::fs::write(temp_dir.path().join("sepolia.json"), "{ invalid json }").unwrap();

        let registry = AddressRegistry::in_dir(temp_dir.path());
        let err = registry.get("sepolia").unwrap_err();
        assert!(matches!(err, RegistryError::Read { .. }));

        // A corrupt store must not be silently replaced by a write.
        let err = registry.set("sepolia", "Hub", HUB).unwrap_err();
        assert!(matches!(err, RegistryError::Read { .. }));
        let content = std::fs::read_to_string(temp_dir.path().join("sepolia.json")).unwrap();
        assert_eq!(content, "{ invalid json }");
    }

    #[test]
    fn test_rejects_path_like_network_names() {
        let registry = AddressRegistry::in_memory();

        assert!(matches!(
            registry.get("../etc"),
            Err(RegistryError::InvalidNetwork(_))
        ));
        assert!(matches!(
            registry.set("", "Hub", HUB),
            Err(RegistryError::InvalidNetwork(_))
        ));
    }

    #[test]
    fn test_overlay_does_not_write_through() {
        let temp_dir = TempDir::new("hubspoke-registry").expect("Failed to create temp dir");
        let registry = AddressRegistry::in_dir(temp_dir.path());
        registry.set("sepolia", "Hub", HUB).unwrap();

        let overlay = registry.overlay();
        overlay.set("sepolia", "USDC", USDC).unwrap();
        overlay.set("opSepolia", "Spoke", USDC).unwrap();

        assert_eq!(overlay.lookup("sepolia", "Hub").unwrap(), Some(HUB));
        assert_eq!(overlay.lookup("sepolia", "USDC").unwrap(), Some(USDC));
        assert_eq!(registry.lookup("sepolia", "USDC").unwrap(), None);
        assert!(!temp_dir.path().join("opSepolia.json").exists());
    }

    #[test]
    fn test_seeded_memory_store() {
        let mut addresses = NetworkAddresses::default();
        addresses.insert("Hub".to_string(), HUB);

        let registry = AddressRegistry::new(MemoryStore::seeded("sepolia", addresses));
        assert_eq!(registry.lookup("sepolia", "Hub").unwrap(), Some(HUB));
        assert!(registry.get("opSepolia").unwrap().is_empty());
    }
}
