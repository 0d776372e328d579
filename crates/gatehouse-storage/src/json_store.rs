//! Storage layout and atomic JSON persistence.
//!
//! Every store is a single JSON document. Writes go to `<file>.tmp`, are
//! flushed to disk, then renamed over the destination, so a reader (or a
//! process restarted mid-write) sees either the old or the new document.
//! Concurrent writers of the same file must be serialized by the caller;
//! each store owns a guard for that.

use crate::error::{StorageError, StorageResult};
use gatehouse_core::constants::{
    BLOCK_LIST_FILE, CREDENTIALS_FILE, DAILY_STATS_FILE, TRANSACTION_CACHE_FILE,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

/// Where the gateway keeps its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    /// Directory holding the JSON stores.
    pub base_dir: PathBuf,

    /// Directory holding captured evidence stills and upload markers.
    pub evidence_dir: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new("data")
    }
}

impl StoragePaths {
    /// Layout rooted at `base_dir`, with evidence in `base_dir/captured_images`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            evidence_dir: base_dir.join("captured_images"),
            base_dir,
        }
    }

    /// Set the evidence directory
    pub fn evidence_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.evidence_dir = dir.into();
        self
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.base_dir.join(CREDENTIALS_FILE)
    }

    pub fn block_list_file(&self) -> PathBuf {
        self.base_dir.join(BLOCK_LIST_FILE)
    }

    pub fn transaction_cache_file(&self) -> PathBuf {
        self.base_dir.join(TRANSACTION_CACHE_FILE)
    }

    pub fn daily_stats_file(&self) -> PathBuf {
        self.base_dir.join(DAILY_STATS_FILE)
    }

    /// Create both directories.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Configuration` if either cannot be created;
    /// the gateway cannot start without them.
    pub async fn ensure_dirs(&self) -> StorageResult<()> {
        for dir in [&self.base_dir, &self.evidence_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                StorageError::Configuration(format!(
                    "Failed to create directory {}: {e}",
                    dir.display()
                ))
            })?;
        }
        Ok(())
    }
}

/// Path with `suffix` appended to the full file name (`a.json` -> `a.json.tmp`).
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Serialize `value` and atomically replace `path` with it.
///
/// # Errors
///
/// Returns `StorageError::Io` if the temporary file cannot be written or
/// renamed; the destination is untouched in that case.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StorageError::json(path, e))?;
    let tmp = with_suffix(path, ".tmp");

    let write = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    };

    if let Err(e) = write.await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StorageError::io(path, e));
    }

    debug!(path = %path.display(), bytes = bytes.len(), "Store written");
    Ok(())
}

/// Read a JSON store, falling back to `T::default()` when it is missing.
///
/// A document that fails to parse is moved aside to `<file>.corrupt` so the
/// next write cannot destroy it, and the default is returned.
///
/// # Errors
///
/// Returns `StorageError::Io` only for read failures other than "not found".
pub async fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> StorageResult<T> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(StorageError::io(path, e)),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }

    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(value),
        Err(e) => {
            let quarantine = with_suffix(path, ".corrupt");
            error!(path = %path.display(), error = %e, "Store is corrupt, moving it aside");
            if let Err(rename_err) = tokio::fs::rename(path, &quarantine).await {
                warn!(path = %path.display(), error = %rename_err, "Failed to quarantine corrupt store");
            }
            Ok(T::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_storage_paths_layout() {
        let paths = StoragePaths::new("/var/lib/gatehouse");

        assert_eq!(paths.credentials_file(), PathBuf::from("/var/lib/gatehouse/users.json"));
        assert_eq!(
            paths.block_list_file(),
            PathBuf::from("/var/lib/gatehouse/blocked_users.json")
        );
        assert_eq!(
            paths.evidence_dir,
            PathBuf::from("/var/lib/gatehouse/captured_images")
        );
    }

    #[test]
    fn test_storage_paths_builder() {
        let paths = StoragePaths::new("data").evidence_dir("/mnt/photos");
        assert_eq!(paths.evidence_dir, PathBuf::from("/mnt/photos"));
        assert_eq!(paths.transaction_cache_file(), PathBuf::from("data/transactions_cache.json"));
    }

    #[test]
    fn test_with_suffix_keeps_extension() {
        let path = Path::new("/tmp/a.jpg");
        assert_eq!(with_suffix(path, ".uploaded.json"), PathBuf::from("/tmp/a.jpg.uploaded.json"));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        let mut value = BTreeMap::new();
        value.insert("111111".to_string(), true);
        write_json_atomic(&path, &value).await.unwrap();

        let read: BTreeMap<String, bool> = read_json_or_default(&path).await.unwrap();
        assert_eq!(read, value);
        assert!(!with_suffix(&path, ".tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_and_empty_files_read_as_default() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");
        let read: Vec<u32> = read_json_or_default(&missing).await.unwrap();
        assert!(read.is_empty());

        let empty = dir.path().join("empty.json");
        tokio::fs::write(&empty, b"  \n").await.unwrap();
        let read: Vec<u32> = read_json_or_default(&empty).await.unwrap();
        assert!(read.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        tokio::fs::write(&path, b"[{\"card_number\": ").await.unwrap();

        let read: Vec<u32> = read_json_or_default(&path).await.unwrap();
        assert!(read.is_empty());
        assert!(!path.exists());
        assert!(with_suffix(&path, ".corrupt").exists());
    }

    #[tokio::test]
    async fn test_ensure_dirs_creates_nested() {
        let dir = TempDir::new().unwrap();
        let paths = StoragePaths::new(dir.path().join("a/b"));
        paths.ensure_dirs().await.unwrap();
        assert!(paths.base_dir.is_dir());
        assert!(paths.evidence_dir.is_dir());
    }

    #[tokio::test]
    async fn test_ensure_dirs_fails_under_a_file() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        tokio::fs::write(&blocker, b"x").await.unwrap();

        let paths = StoragePaths::new(blocker.join("nested"));
        assert!(matches!(
            paths.ensure_dirs().await,
            Err(StorageError::Configuration(_))
        ));
    }
}
