//! Local transaction cache.
//!
//! The cache is a JSON array of transactions that have not yet been
//! confirmed by the remote store. Every mutation rewrites the whole list
//! atomically under the cache's guard.
//!
//! Records written before ids existed are given one on first read and the
//! file is rewritten, so an id is stable for the life of the record.

use crate::error::{StorageError, StorageResult};
use crate::json_store::{read_json_or_default, write_json_atomic};
use gatehouse_core::Transaction;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct TransactionCache {
    path: PathBuf,
    guard: Mutex<()>,
}

impl TransactionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full cache.
    pub async fn load(&self) -> StorageResult<Vec<Transaction>> {
        let _guard = self.guard.lock().await;
        self.read_locked().await
    }

    /// Caller holds `guard`.
    async fn read_locked(&self) -> StorageResult<Vec<Transaction>> {
        let raw: Vec<Value> = read_json_or_default(&self.path).await?;
        let missing = raw
            .iter()
            .filter(|record| record.get("id").is_none_or(Value::is_null))
            .count();

        let cached: Vec<Transaction> =
            serde_json::from_value(Value::Array(raw)).map_err(|e| StorageError::json(self.path.clone(), e))?;

        if missing > 0 {
            write_json_atomic(&self.path, &cached).await?;
            warn!(assigned = missing, "Assigned ids to cached transactions without one");
        }
        Ok(cached)
    }

    /// Number of cached transactions.
    pub async fn len(&self) -> StorageResult<usize> {
        Ok(self.load().await?.len())
    }

    pub async fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Append one transaction. A transaction already cached under the same
    /// id is not duplicated.
    pub async fn append(&self, transaction: Transaction) -> StorageResult<()> {
        let _guard = self.guard.lock().await;
        let mut cached = self.read_locked().await?;
        if cached.iter().any(|t| t.id == transaction.id) {
            debug!(id = %transaction.id, "Transaction already cached");
            return Ok(());
        }
        cached.push(transaction);
        write_json_atomic(&self.path, &cached).await?;
        debug!(cached = cached.len(), "Transaction cached");
        Ok(())
    }

    /// Drop every cached transaction whose id is in `synced`, keeping the
    /// rest in their original order. Returns the remaining count.
    ///
    /// Transactions appended while a sync pass was running are kept, since
    /// they cannot be in `synced`.
    pub async fn remove_synced(&self, synced: &HashSet<Uuid>) -> StorageResult<usize> {
        let _guard = self.guard.lock().await;
        let mut cached = self.read_locked().await?;
        let before = cached.len();
        cached.retain(|t| !synced.contains(&t.id));

        if cached.len() != before {
            write_json_atomic(&self.path, &cached).await?;
            info!(removed = before - cached.len(), remaining = cached.len(), "Transaction cache trimmed");
        }
        Ok(cached.len())
    }

    /// Size of the cache file in bytes, or 0 if it does not exist.
    pub async fn file_size(&self) -> u64 {
        tokio::fs::metadata(&self.path)
            .await
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::{AccessOutcome, CardId, ReaderChannel};
    use tempfile::TempDir;

    fn txn(card: u64) -> Transaction {
        Transaction::new(
            CardId::new(card),
            "Unknown",
            AccessOutcome::Denied,
            ReaderChannel::new(1).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_append_and_load() {
        let dir = TempDir::new().unwrap();
        let cache = TransactionCache::new(dir.path().join("cache.json"));

        cache.append(txn(1)).await.unwrap();
        cache.append(txn(2)).await.unwrap();

        let loaded = cache.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].card_id, CardId::new(1));
        assert_eq!(loaded[1].card_id, CardId::new(2));
    }

    #[tokio::test]
    async fn test_append_same_id_once() {
        let dir = TempDir::new().unwrap();
        let cache = TransactionCache::new(dir.path().join("cache.json"));

        let t = txn(1);
        cache.append(t.clone()).await.unwrap();
        cache.append(t).await.unwrap();
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_synced_keeps_remainder_in_order() {
        let dir = TempDir::new().unwrap();
        let cache = TransactionCache::new(dir.path().join("cache.json"));

        let all: Vec<_> = (1..=5).map(txn).collect();
        for t in &all {
            cache.append(t.clone()).await.unwrap();
        }

        let synced: HashSet<Uuid> = [all[0].id, all[2].id].into_iter().collect();
        assert_eq!(cache.remove_synced(&synced).await.unwrap(), 3);

        let cards: Vec<u64> = cache
            .load()
            .await
            .unwrap()
            .iter()
            .map(|t| t.card_id.as_u64())
            .collect();
        assert_eq!(cards, vec![2, 4, 5]);
    }

    #[tokio::test]
    async fn test_records_without_id_keep_a_stable_id() {
        let dir = TempDir::new().unwrap();
        let cache = TransactionCache::new(dir.path().join("cache.json"));
        let legacy = serde_json::json!([
            {"card_number": "111111", "name": "Alice", "status": "Access Granted", "timestamp": 1_700_000_000, "reader": 1},
            {"card_number": "222222", "name": "Unknown", "status": "Access Denied", "timestamp": 1_700_000_060, "reader": 2},
        ]);
        tokio::fs::write(cache.path(), legacy.to_string()).await.unwrap();

        let first = cache.load().await.unwrap();
        let second = cache.load().await.unwrap();
        assert_eq!(first, second);

        let synced: HashSet<Uuid> = first.iter().map(|t| t.id).collect();
        assert_eq!(cache.remove_synced(&synced).await.unwrap(), 0);
        assert!(cache.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_persisted_layout() {
        let dir = TempDir::new().unwrap();
        let cache = TransactionCache::new(dir.path().join("cache.json"));
        cache.append(txn(111111).with_timestamp(1_700_000_000)).await.unwrap();

        let raw = tokio::fs::read_to_string(cache.path()).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let record = &value[0];
        assert_eq!(record["card_number"], "111111");
        assert_eq!(record["status"], "Access Denied");
        assert_eq!(record["reader"], 1);
        assert_eq!(record["timestamp"], 1_700_000_000);
    }
}
