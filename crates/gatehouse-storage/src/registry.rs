//! Credential registry: the persisted allow-list and block-list.
//!
//! Each list is a JSON object keyed by decimal card string. Next to the
//! persisted map the registry keeps a derived lookup set of card ids so the
//! decision path answers "allowed?" and "blocked?" in O(1) without touching
//! disk.
//!
//! # Consistency
//!
//! Map and set are published together as one immutable snapshot behind an
//! `Arc`. A save holds the store's write guard, persists the file, builds the
//! new snapshot and swaps it in before returning. Readers clone the `Arc`
//! and therefore see either the complete old snapshot or the complete new
//! one, never a mix, and never a set older than the last completed save.
//!
//! Keys that do not parse as integers are kept in the file but left out of
//! the lookup set.

use crate::error::StorageResult;
use crate::json_store::{StoragePaths, read_json_or_default, write_json_atomic};
use gatehouse_core::{CardId, Credential};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Persisted allow-list: card string -> credential.
pub type CredentialMap = BTreeMap<String, Credential>;

/// Persisted block-list: card string -> blocked flag.
pub type BlockMap = BTreeMap<String, bool>;

/// Immutable view of one store plus its lookup set.
#[derive(Debug)]
pub struct Snapshot<V> {
    entries: BTreeMap<String, V>,
    ids: HashSet<CardId>,
}

impl<V> Snapshot<V> {
    fn build(entries: BTreeMap<String, V>, include: fn(&V) -> bool) -> Self {
        let mut skipped = 0usize;
        let mut ids = HashSet::with_capacity(entries.len());
        for (key, value) in &entries {
            match key.parse::<CardId>() {
                Ok(id) if include(value) => {
                    ids.insert(id);
                }
                Ok(_) => {}
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(skipped, "Skipped non-numeric card keys while building lookup set");
        }
        Self { entries, ids }
    }

    pub fn entries(&self) -> &BTreeMap<String, V> {
        &self.entries
    }

    pub fn ids(&self) -> &HashSet<CardId> {
        &self.ids
    }

    pub fn contains(&self, card: CardId) -> bool {
        self.ids.contains(&card)
    }
}

/// One JSON-backed map with its own write guard.
#[derive(Debug)]
struct Store<V> {
    name: &'static str,
    path: PathBuf,
    include: fn(&V) -> bool,
    guard: tokio::sync::Mutex<()>,
    snapshot: RwLock<Arc<Snapshot<V>>>,
}

impl<V> Store<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    fn new(name: &'static str, path: PathBuf, include: fn(&V) -> bool) -> Self {
        Self {
            name,
            path,
            include,
            guard: tokio::sync::Mutex::new(()),
            snapshot: RwLock::new(Arc::new(Snapshot::build(BTreeMap::new(), include))),
        }
    }

    fn current(&self) -> Arc<Snapshot<V>> {
        self.snapshot.read().clone()
    }

    fn publish(&self, entries: BTreeMap<String, V>) -> Arc<Snapshot<V>> {
        let snapshot = Arc::new(Snapshot::build(entries, self.include));
        *self.snapshot.write() = snapshot.clone();
        snapshot
    }

    async fn load(&self) -> StorageResult<BTreeMap<String, V>> {
        let _guard = self.guard.lock().await;
        let entries: BTreeMap<String, V> = read_json_or_default(&self.path).await?;
        let snapshot = self.publish(entries);
        debug!(store = self.name, entries = snapshot.entries.len(), ids = snapshot.ids.len(), "Store loaded");
        Ok(snapshot.entries.clone())
    }

    async fn save(&self, entries: BTreeMap<String, V>) -> StorageResult<()> {
        let _guard = self.guard.lock().await;
        write_json_atomic(&self.path, &entries).await?;
        let snapshot = self.publish(entries);
        debug!(store = self.name, entries = snapshot.entries.len(), ids = snapshot.ids.len(), "Store saved");
        Ok(())
    }

    /// Read-modify-write under the guard. The closure sees the current
    /// in-memory map; nothing is written if it returns `false`.
    async fn update<F>(&self, f: F) -> StorageResult<bool>
    where
        F: FnOnce(&mut BTreeMap<String, V>) -> bool,
    {
        let _guard = self.guard.lock().await;
        let mut entries = self.current().entries.clone();
        if !f(&mut entries) {
            return Ok(false);
        }
        write_json_atomic(&self.path, &entries).await?;
        self.publish(entries);
        Ok(true)
    }
}

/// How a card is classified against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Blocked,
    /// Allowed; the name is `None` only if the entry vanished between the
    /// set test and the lookup.
    Allowed(Option<String>),
    Unknown,
}

/// The gateway's credential registry.
///
/// Created once at startup and shared by reference; there is no global
/// instance.
#[derive(Debug)]
pub struct CredentialRegistry {
    credentials: Store<Credential>,
    blocked: Store<bool>,
}

impl CredentialRegistry {
    /// Registry over the files named by `paths`, not yet loaded.
    pub fn new(paths: &StoragePaths) -> Self {
        Self::with_files(paths.credentials_file(), paths.block_list_file())
    }

    pub fn with_files(credentials: impl Into<PathBuf>, block_list: impl Into<PathBuf>) -> Self {
        Self {
            credentials: Store::new("credentials", credentials.into(), |_| true),
            blocked: Store::new("block_list", block_list.into(), |blocked| *blocked),
        }
    }

    /// Create and load both stores.
    pub async fn open(paths: &StoragePaths) -> StorageResult<Self> {
        let registry = Self::new(paths);
        let credentials = registry.load_credentials().await?;
        let blocked = registry.load_block_list().await?;
        info!(
            credentials = credentials.len(),
            blocked = blocked.values().filter(|b| **b).count(),
            "Credential registry loaded"
        );
        Ok(registry)
    }

    /// Re-read the allow-list from disk and rebuild its lookup set.
    pub async fn load_credentials(&self) -> StorageResult<CredentialMap> {
        self.credentials.load().await
    }

    /// Persist the allow-list and rebuild its lookup set before returning.
    pub async fn save_credentials(&self, map: CredentialMap) -> StorageResult<()> {
        self.credentials.save(map).await
    }

    /// Re-read the block-list from disk and rebuild its lookup set.
    pub async fn load_block_list(&self) -> StorageResult<BlockMap> {
        self.blocked.load().await
    }

    /// Persist the block-list and rebuild its lookup set before returning.
    pub async fn save_block_list(&self, map: BlockMap) -> StorageResult<()> {
        self.blocked.save(map).await
    }

    /// Atomically modify the allow-list. Returns whether anything was saved.
    pub async fn update_credentials<F>(&self, f: F) -> StorageResult<bool>
    where
        F: FnOnce(&mut CredentialMap) -> bool,
    {
        self.credentials.update(f).await
    }

    /// Atomically modify the block-list. Returns whether anything was saved.
    pub async fn update_block_list<F>(&self, f: F) -> StorageResult<bool>
    where
        F: FnOnce(&mut BlockMap) -> bool,
    {
        self.blocked.update(f).await
    }

    /// Insert or replace one credential.
    pub async fn upsert_credential(&self, card: CardId, credential: Credential) -> StorageResult<()> {
        self.update_credentials(|map| {
            map.insert(card.to_string(), credential);
            true
        })
        .await
        .map(|_| ())
    }

    /// Remove one credential. Returns whether it existed.
    pub async fn remove_credential(&self, card: CardId) -> StorageResult<bool> {
        self.update_credentials(|map| map.remove(&card.to_string()).is_some())
            .await
    }

    /// Block or unblock a card. Unblocking removes the entry.
    pub async fn set_blocked(&self, card: CardId, blocked: bool) -> StorageResult<bool> {
        self.update_block_list(|map| {
            let key = card.to_string();
            if blocked {
                map.insert(key, true) != Some(true)
            } else {
                map.remove(&key).is_some()
            }
        })
        .await
    }

    /// Classify a card against the current snapshots. Never blocks on I/O.
    pub fn classify(&self, card: CardId) -> Classification {
        if self.blocked.current().contains(card) {
            return Classification::Blocked;
        }
        let credentials = self.credentials.current();
        if credentials.contains(card) {
            let name = credentials
                .entries
                .get(&card.to_string())
                .map(|c| c.name_or_unknown().to_string());
            return Classification::Allowed(name);
        }
        Classification::Unknown
    }

    pub fn is_blocked(&self, card: CardId) -> bool {
        self.blocked.current().contains(card)
    }

    pub fn is_allowed(&self, card: CardId) -> bool {
        self.credentials.current().contains(card)
    }

    /// Current allow-list snapshot.
    pub fn credentials(&self) -> Arc<Snapshot<Credential>> {
        self.credentials.current()
    }

    /// Current block-list snapshot.
    pub fn block_list(&self) -> Arc<Snapshot<bool>> {
        self.blocked.current()
    }

    pub fn credentials_path(&self) -> &Path {
        &self.credentials.path
    }

    pub fn block_list_path(&self) -> &Path {
        &self.blocked.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn registry(dir: &TempDir) -> CredentialRegistry {
        CredentialRegistry::open(&StoragePaths::new(dir.path())).await.unwrap()
    }

    fn alice() -> Credential {
        Credential::new(CardId::new(111111), "u-1", "Alice")
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).await;

        assert_eq!(registry.classify(CardId::new(1)), Classification::Unknown);
        assert!(registry.credentials().entries().is_empty());
    }

    #[tokio::test]
    async fn test_save_rebuilds_set_before_returning() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).await;

        let mut map = CredentialMap::new();
        map.insert("111111".into(), alice());
        registry.save_credentials(map).await.unwrap();

        assert!(registry.is_allowed(CardId::new(111111)));
        assert_eq!(
            registry.classify(CardId::new(111111)),
            Classification::Allowed(Some("Alice".into()))
        );
    }

    #[tokio::test]
    async fn test_non_numeric_keys_are_skipped() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).await;

        let mut map = CredentialMap::new();
        map.insert("111111".into(), alice());
        map.insert("abc".into(), Credential::new(CardId::new(0), "u-x", "Broken"));
        registry.save_credentials(map).await.unwrap();

        let snapshot = registry.credentials();
        assert_eq!(snapshot.entries().len(), 2);
        assert_eq!(snapshot.ids().len(), 1);
    }

    #[tokio::test]
    async fn test_block_set_only_counts_true_values() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).await;

        let mut map = BlockMap::new();
        map.insert("5".into(), true);
        map.insert("6".into(), false);
        registry.save_block_list(map).await.unwrap();

        assert!(registry.is_blocked(CardId::new(5)));
        assert!(!registry.is_blocked(CardId::new(6)));
    }

    #[tokio::test]
    async fn test_blocked_wins_over_allowed() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).await;

        registry.upsert_credential(CardId::new(111111), alice()).await.unwrap();
        registry.set_blocked(CardId::new(111111), true).await.unwrap();

        assert_eq!(registry.classify(CardId::new(111111)), Classification::Blocked);
    }

    #[tokio::test]
    async fn test_set_blocked_reports_change() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).await;

        assert!(registry.set_blocked(CardId::new(9), true).await.unwrap());
        assert!(!registry.set_blocked(CardId::new(9), true).await.unwrap());
        assert!(registry.set_blocked(CardId::new(9), false).await.unwrap());
        assert!(!registry.set_blocked(CardId::new(9), false).await.unwrap());
        assert!(!registry.is_blocked(CardId::new(9)));
    }

    #[tokio::test]
    async fn test_reload_reads_external_edit() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).await;

        tokio::fs::write(
            registry.credentials_path(),
            br#"{"42": {"id": "u-42", "name": "Bob", "card_number": "42"}}"#,
        )
        .await
        .unwrap();
        assert!(!registry.is_allowed(CardId::new(42)));

        registry.load_credentials().await.unwrap();
        assert!(registry.is_allowed(CardId::new(42)));
    }

    #[tokio::test]
    async fn test_remove_credential() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).await;

        registry.upsert_credential(CardId::new(111111), alice()).await.unwrap();
        assert!(registry.remove_credential(CardId::new(111111)).await.unwrap());
        assert!(!registry.remove_credential(CardId::new(111111)).await.unwrap());
        assert!(!registry.is_allowed(CardId::new(111111)));
    }
}
