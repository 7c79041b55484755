//! File-backed JSON ledgers
//!
//! One JSON object per store, keyed by the owner identity as a string;
//! loaded fully on every read, serialized fully on every write. Malformed
//! entries are skipped on load so one bad record cannot take the whole
//! ledger down. Callers that need a consistent read-allocate-write
//! sequence must serialize access themselves (the lifecycle manager holds
//! a per-node lock for this).

use crate::types::{PeerRecord, UserRecord};
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

const PEERS_FILE: &str = "peers.json";
const USERS_FILE: &str = "users.json";

/// Low-level JSON object store keyed by string identity.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_raw(&self) -> Result<BTreeMap<String, Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str(&text) {
            Ok(map) => Ok(map),
            Err(e) => {
                // An unreadable store is treated as empty rather than
                // fatal; the next write replaces it.
                warn!(path = %self.path.display(), error = %e, "store file unreadable, treating as empty");
                Ok(BTreeMap::new())
            }
        }
    }

    fn save_raw(&self, map: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }

    /// All records that deserialize cleanly; malformed entries are
    /// skipped with a warning.
    pub fn list<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let raw = self.load_raw()?;
        let mut out = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            match serde_json::from_value(value) {
                Ok(record) => out.push(record),
                Err(e) => {
                    warn!(path = %self.path.display(), %key, error = %e, "skipping malformed store entry");
                }
            }
        }
        Ok(out)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = self.load_raw()?;
        let Some(value) = raw.get(key) else {
            return Ok(None);
        };
        match serde_json::from_value(value.clone()) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(path = %self.path.display(), %key, error = %e, "skipping malformed store entry");
                Ok(None)
            }
        }
    }

    /// Read-modify-write upsert of one record.
    pub fn upsert<T: Serialize>(&self, key: &str, record: &T) -> Result<()> {
        let mut raw = self.load_raw()?;
        raw.insert(key.to_string(), serde_json::to_value(record)?);
        self.save_raw(&raw)
    }
}

/// Ledger of provisioned peers, keyed by owner telegram id.
///
/// Owner-keyed on purpose: creating a peer on a new node supersedes the
/// record for the old node. Cross-node coexistence is not a thing here.
#[derive(Debug, Clone)]
pub struct PeerStore {
    inner: JsonStore,
}

impl PeerStore {
    pub fn open(data_dir: impl AsRef<Path>) -> Self {
        Self {
            inner: JsonStore::new(data_dir.as_ref().join(PEERS_FILE)),
        }
    }

    pub fn list_all(&self) -> Result<Vec<PeerRecord>> {
        self.inner.list()
    }

    /// Find the peer for an owner. With `node_id = None` any node
    /// matches, which is how cross-node migration is detected.
    pub fn find_by_owner(&self, owner: i64, node_id: Option<&str>) -> Result<Option<PeerRecord>> {
        let record: Option<PeerRecord> = self.inner.get(&owner.to_string())?;
        Ok(record.filter(|r| node_id.map_or(true, |n| r.node_id == n)))
    }

    pub fn upsert(&self, record: &PeerRecord) -> Result<()> {
        self.inner.upsert(&record.telegram_id.to_string(), record)
    }
}

/// Ledger of owner identities, keyed by telegram id.
#[derive(Debug, Clone)]
pub struct UserStore {
    inner: JsonStore,
}

impl UserStore {
    pub fn open(data_dir: impl AsRef<Path>) -> Self {
        Self {
            inner: JsonStore::new(data_dir.as_ref().join(USERS_FILE)),
        }
    }

    pub fn list_all(&self) -> Result<Vec<UserRecord>> {
        self.inner.list()
    }

    pub fn find(&self, telegram_id: i64) -> Result<Option<UserRecord>> {
        self.inner.get(&telegram_id.to_string())
    }

    pub fn upsert(&self, record: &UserRecord) -> Result<()> {
        self.inner.upsert(&record.telegram_id.to_string(), record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProfileType, Role};

    fn peer(owner: i64, node: &str, address: &str) -> PeerRecord {
        PeerRecord {
            telegram_id: owner,
            address: address.to_string(),
            public_key: format!("pk-{owner}"),
            node_id: node.to_string(),
            active: true,
            profile: None,
            updated_at: 0,
        }
    }

    #[test]
    fn test_peer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PeerStore::open(dir.path());

        assert!(store.list_all().unwrap().is_empty());
        store.upsert(&peer(100, "main", "10.0.0.3/24")).unwrap();

        let found = store.find_by_owner(100, None).unwrap().unwrap();
        assert_eq!(found.address, "10.0.0.3/24");
        assert_eq!(found.node_id, "main");
    }

    #[test]
    fn test_find_by_owner_node_filter() {
        let dir = tempfile::tempdir().unwrap();
        let store = PeerStore::open(dir.path());
        store.upsert(&peer(100, "eu1", "10.1.0.8/32")).unwrap();

        assert!(store.find_by_owner(100, Some("eu1")).unwrap().is_some());
        assert!(store.find_by_owner(100, Some("main")).unwrap().is_none());
        assert!(store.find_by_owner(100, None).unwrap().is_some());
    }

    #[test]
    fn test_upsert_supersedes_across_nodes() {
        // Owner-keyed store: a peer on a new node replaces the old record.
        let dir = tempfile::tempdir().unwrap();
        let store = PeerStore::open(dir.path());
        store.upsert(&peer(100, "main", "10.0.0.3/24")).unwrap();
        store.upsert(&peer(100, "eu1", "10.1.0.8/32")).unwrap();

        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        let found = store.find_by_owner(100, None).unwrap().unwrap();
        assert_eq!(found.node_id, "eu1");
        assert!(store.find_by_owner(100, Some("main")).unwrap().is_none());
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PEERS_FILE);
        std::fs::write(
            &path,
            r#"{
                "100": {"telegram_id": 100, "address": "10.0.0.3/24", "public_key": "pk"},
                "101": {"telegram_id": 101},
                "102": "not an object"
            }"#,
        )
        .unwrap();

        let store = PeerStore::open(dir.path());
        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].telegram_id, 100);
        assert!(store.find_by_owner(101, None).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PEERS_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        let store = PeerStore::open(dir.path());
        assert!(store.list_all().unwrap().is_empty());

        // A write replaces the corrupt file.
        store.upsert(&peer(100, "main", "10.0.0.3/24")).unwrap();
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_user_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::open(dir.path());

        let mut user = UserRecord::new(7, Some("owner".to_string()), Role::Owner);
        user.preferred_node = Some("eu1".to_string());
        user.preferred_profile = Some(ProfileType::Unified);
        store.upsert(&user).unwrap();

        let found = store.find(7).unwrap().unwrap();
        assert!(found.is_owner());
        assert_eq!(found.preferred_node.as_deref(), Some("eu1"));
        assert_eq!(found.preferred_profile, Some(ProfileType::Unified));
        assert!(store.find(8).unwrap().is_none());
    }
}
