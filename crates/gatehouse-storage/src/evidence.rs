//! Evidence stills and their upload markers.
//!
//! Stills are named `<card>_<epoch>_<channel>.jpg`. An upload marker is a
//! sibling `<still>.uploaded.json` file written only after the remote store
//! confirmed the upload; its presence is the sole record that a still was
//! uploaded. Nothing here holds a directory-wide lock: captures land via
//! rename, markers are written atomically, and destructive paths always
//! check the filesystem rather than trusting cached state.

use crate::error::{StorageError, StorageResult};
use crate::json_store::{with_suffix, write_json_atomic};
use chrono::{DateTime, Utc};
use gatehouse_core::constants::{EVIDENCE_EXTENSION, UPLOAD_MARKER_SUFFIX};
use gatehouse_core::{CardId, ReaderChannel};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const MAX_CARD_LEN: usize = 50;
const SECONDS_PER_DAY: i64 = 86_400;

/// Sidecar written after a confirmed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMarker {
    /// RFC 3339 upload time.
    pub uploaded_at: String,

    /// Remote location string returned by the uploader.
    #[serde(alias = "s3_location")]
    pub location: String,
}

impl UploadMarker {
    pub fn now(location: impl Into<String>) -> Self {
        Self {
            uploaded_at: Utc::now().to_rfc3339(),
            location: location.into(),
        }
    }
}

/// Fields recovered from a still's file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub card: String,
    pub captured_at: i64,
    pub reader_channel: Option<ReaderChannel>,
}

/// Parse `<card>_<epoch>_<channel>` or the older `<card>_<epoch>`.
pub fn parse_file_stem(stem: &str) -> Option<ParsedName> {
    let mut parts = stem.rsplitn(3, '_');
    let last = parts.next()?;
    let middle = parts.next();
    let first = parts.next();

    if let (Some(middle), Some(first)) = (middle, first) {
        if let (Ok(ts), Ok(channel)) = (middle.parse::<i64>(), last.parse::<u8>()) {
            if let Ok(channel) = ReaderChannel::new(channel) {
                return Some(ParsedName {
                    card: first.to_string(),
                    captured_at: ts,
                    reader_channel: Some(channel),
                });
            }
        }
    }

    let (card, ts) = stem.rsplit_once('_')?;
    let captured_at = ts.parse::<i64>().ok()?;
    Some(ParsedName {
        card: card.to_string(),
        captured_at,
        reader_channel: None,
    })
}

/// Restrict a card string to `[A-Za-z0-9_-]`, at most 50 characters.
pub fn sanitize_card(card: &str) -> String {
    let cleaned: String = card
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(MAX_CARD_LEN)
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Marker path for a still.
pub fn marker_path(image: &Path) -> PathBuf {
    with_suffix(image, UPLOAD_MARKER_SUFFIX)
}

/// One still found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceFile {
    pub path: PathBuf,
    pub card: Option<String>,
    pub reader_channel: Option<ReaderChannel>,
    /// Capture time from the file name.
    pub captured_at: Option<i64>,
    /// Modification time, epoch seconds.
    pub modified: i64,
    pub size: u64,
    pub uploaded: bool,
}

impl EvidenceFile {
    /// Age ordering key: the embedded capture time, else the mtime.
    pub fn timestamp(&self) -> i64 {
        self.captured_at.unwrap_or(self.modified)
    }

    pub fn card_id(&self) -> Option<CardId> {
        self.card.as_deref()?.parse().ok()
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Bytes used by the evidence directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryUsage {
    pub files: usize,
    pub bytes: u64,
}

/// Outcome of a deletion sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub deleted: usize,
    pub freed: u64,
}

#[derive(Debug, Clone)]
pub struct EvidenceStore {
    dir: PathBuf,
}

impl EvidenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Destination for a new capture.
    pub fn path_for(&self, card: &str, channel: ReaderChannel, captured_at: i64) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{}.{}",
            sanitize_card(card),
            captured_at,
            channel,
            EVIDENCE_EXTENSION
        ))
    }

    /// Scratch path a capture is written to before being renamed into place.
    pub fn partial_path(image: &Path) -> PathBuf {
        with_suffix(image, ".part")
    }

    /// Atomically publish a finished capture.
    pub async fn commit_capture(&self, partial: &Path, image: &Path) -> StorageResult<()> {
        tokio::fs::rename(partial, image)
            .await
            .map_err(|e| StorageError::io(image, e))
    }

    pub async fn is_uploaded(&self, image: &Path) -> bool {
        tokio::fs::try_exists(marker_path(image)).await.unwrap_or(false)
    }

    pub async fn read_marker(&self, image: &Path) -> StorageResult<Option<UploadMarker>> {
        let path = marker_path(image);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::json(&path, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    /// Record a confirmed upload. Fails if the still no longer exists, so a
    /// marker is never left behind for a file eviction already removed.
    pub async fn write_marker(&self, image: &Path, location: impl Into<String>) -> StorageResult<()> {
        if !tokio::fs::try_exists(image).await.unwrap_or(false) {
            return Err(StorageError::not_found("evidence file", image.display()));
        }
        let marker = UploadMarker::now(location);
        write_json_atomic(&marker_path(image), &marker).await?;
        debug!(image = %image.display(), location = %marker.location, "Upload marker written");
        Ok(())
    }

    /// Every still in the directory, unsorted.
    pub async fn list(&self) -> StorageResult<Vec<EvidenceFile>> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?
        {
            let path = entry.path();
            if !is_evidence(&path) {
                continue;
            }
            // Racing deletions are expected.
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }

            let parsed = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(parse_file_stem);
            let uploaded = self.is_uploaded(&path).await;
            files.push(EvidenceFile {
                card: parsed.as_ref().map(|p| p.card.clone()),
                reader_channel: parsed.as_ref().and_then(|p| p.reader_channel),
                captured_at: parsed.map(|p| p.captured_at),
                modified: meta.modified().map(epoch_seconds).unwrap_or(0),
                size: meta.len(),
                uploaded,
                path,
            });
        }
        Ok(files)
    }

    /// Every still, oldest first by [`EvidenceFile::timestamp`], ties by path.
    pub async fn list_oldest_first(&self) -> StorageResult<Vec<EvidenceFile>> {
        let mut files = self.list().await?;
        files.sort_by(|a, b| {
            a.timestamp()
                .cmp(&b.timestamp())
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(files)
    }

    /// Up to `limit` stills without a marker, oldest first.
    pub async fn pending(&self, limit: usize) -> StorageResult<Vec<EvidenceFile>> {
        Ok(self
            .list_oldest_first()
            .await?
            .into_iter()
            .filter(|f| !f.uploaded)
            .take(limit)
            .collect())
    }

    /// Total size of every regular file in the directory, markers included.
    pub async fn usage(&self) -> StorageResult<DirectoryUsage> {
        let mut usage = DirectoryUsage::default();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(usage),
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?
        {
            if let Ok(meta) = entry.metadata().await {
                if meta.is_file() {
                    usage.files += 1;
                    usage.bytes += meta.len();
                }
            }
        }
        Ok(usage)
    }

    /// Delete a still and then its marker, if one exists. Returns the bytes
    /// freed; a still that is already gone frees nothing.
    pub async fn delete(&self, image: &Path) -> StorageResult<u64> {
        let mut freed = 0;

        match tokio::fs::metadata(image).await {
            Ok(meta) => {
                tokio::fs::remove_file(image)
                    .await
                    .or_else(ignore_not_found)
                    .map_err(|e| StorageError::io(image, e))?;
                freed += meta.len();
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(image, e)),
        }

        let marker = marker_path(image);
        if let Ok(meta) = tokio::fs::metadata(&marker).await {
            match tokio::fs::remove_file(&marker).await {
                Ok(()) => freed += meta.len(),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(marker = %marker.display(), error = %e, "Failed to delete upload marker");
                }
            }
        }
        Ok(freed)
    }

    /// Delete stills captured more than `days` days before `now` (epoch seconds).
    pub async fn purge_older_than(&self, days: u32, now: i64) -> StorageResult<PurgeReport> {
        let cutoff = now - i64::from(days) * SECONDS_PER_DAY;
        let mut report = PurgeReport::default();

        for file in self.list_oldest_first().await? {
            if file.timestamp() >= cutoff {
                break;
            }
            match self.delete(&file.path).await {
                Ok(freed) => {
                    report.deleted += 1;
                    report.freed += freed;
                }
                Err(e) => warn!(path = %file.path.display(), error = %e, "Failed to purge evidence file"),
            }
        }

        if report.deleted > 0 {
            info!(deleted = report.deleted, freed = report.freed, days, "Old evidence purged");
        }
        Ok(report)
    }

    /// Delete markers whose still no longer exists.
    pub async fn sweep_orphan_markers(&self) -> StorageResult<usize> {
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(image_name) = name.strip_suffix(UPLOAD_MARKER_SUFFIX) else {
                continue;
            };
            if tokio::fs::try_exists(self.dir.join(image_name))
                .await
                .unwrap_or(true)
            {
                continue;
            }
            if tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "Orphan upload markers removed");
        }
        Ok(removed)
    }
}

fn is_evidence(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(EVIDENCE_EXTENSION))
}

fn epoch_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn ignore_not_found(e: std::io::Error) -> std::io::Result<()> {
    if e.kind() == ErrorKind::NotFound {
        Ok(())
    } else {
        Err(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn channel(n: u8) -> ReaderChannel {
        ReaderChannel::new(n).unwrap()
    }

    async fn write(store: &EvidenceStore, card: &str, ts: i64, bytes: usize) -> PathBuf {
        let path = store.path_for(card, channel(1), ts);
        tokio::fs::write(&path, vec![0u8; bytes]).await.unwrap();
        path
    }

    #[rstest]
    #[case("111111_1700000000_2", Some(("111111", 1_700_000_000, Some(2))))]
    #[case("111111_1700000000", Some(("111111", 1_700_000_000, None)))]
    #[case("abc_def_1700000000_1", Some(("abc_def", 1_700_000_000, Some(1))))]
    #[case("111111_1700000000_99", Some(("111111_1700000000", 99, None)))]
    #[case("snapshot", None)]
    #[case("111111_notatime", None)]
    fn test_parse_file_stem(#[case] stem: &str, #[case] expected: Option<(&str, i64, Option<u8>)>) {
        let parsed = parse_file_stem(stem);
        let expected = expected.map(|(card, ts, ch)| ParsedName {
            card: card.to_string(),
            captured_at: ts,
            reader_channel: ch.map(channel),
        });
        assert_eq!(parsed, expected);
    }

    #[rstest]
    #[case("111111", "111111")]
    #[case("../../etc/passwd", "etcpasswd")]
    #[case("", "unknown")]
    #[case("!!!", "unknown")]
    #[case("a-b_c", "a-b_c")]
    fn test_sanitize_card(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize_card(input), expected);
    }

    #[test]
    fn test_sanitize_card_truncates() {
        assert_eq!(sanitize_card(&"9".repeat(80)).len(), 50);
    }

    #[test]
    fn test_path_for_layout() {
        let store = EvidenceStore::new("/data/captured_images");
        assert_eq!(
            store.path_for("111111", channel(2), 1_700_000_000),
            PathBuf::from("/data/captured_images/111111_1700000000_2.jpg")
        );
    }

    #[tokio::test]
    async fn test_list_parses_names_and_markers() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::new(dir.path());
        let a = write(&store, "111111", 100, 10).await;
        write(&store, "222222", 200, 20).await;
        store.write_marker(&a, "bucket/a.jpg").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"x").await.unwrap();

        let files = store.list_oldest_first().await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].card_id(), Some(CardId::new(111111)));
        assert_eq!(files[0].captured_at, Some(100));
        assert_eq!(files[0].reader_channel, Some(channel(1)));
        assert!(files[0].uploaded);
        assert!(!files[1].uploaded);

        let marker = store.read_marker(&a).await.unwrap().unwrap();
        assert_eq!(marker.location, "bucket/a.jpg");
    }

    #[tokio::test]
    async fn test_marker_accepts_legacy_field_name() {
        let marker: UploadMarker =
            serde_json::from_str(r#"{"uploaded_at": "2024-01-01T00:00:00Z", "s3_location": "s3://b/k"}"#)
                .unwrap();
        assert_eq!(marker.location, "s3://b/k");
    }

    #[tokio::test]
    async fn test_pending_skips_uploaded_and_limits() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::new(dir.path());
        let a = write(&store, "1", 100, 1).await;
        write(&store, "2", 300, 1).await;
        write(&store, "3", 200, 1).await;
        store.write_marker(&a, "loc").await.unwrap();

        let pending = store.pending(1).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].card.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_write_marker_requires_image() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::new(dir.path());
        let missing = store.path_for("1", channel(1), 5);

        assert!(matches!(
            store.write_marker(&missing, "loc").await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(!marker_path(&missing).exists());
    }

    #[tokio::test]
    async fn test_delete_removes_image_and_marker() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::new(dir.path());
        let a = write(&store, "1", 100, 64).await;
        store.write_marker(&a, "loc").await.unwrap();

        let freed = store.delete(&a).await.unwrap();
        assert!(freed >= 64);
        assert!(!a.exists());
        assert!(!marker_path(&a).exists());
        assert_eq!(store.delete(&a).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_older_than() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::new(dir.path());
        let now = 100 * SECONDS_PER_DAY;
        let old = write(&store, "1", now - 40 * SECONDS_PER_DAY, 8).await;
        let recent = write(&store, "2", now - 10 * SECONDS_PER_DAY, 8).await;

        let report = store.purge_older_than(30, now).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(!old.exists());
        assert!(recent.exists());
    }

    #[tokio::test]
    async fn test_sweep_orphan_markers() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::new(dir.path());
        let a = write(&store, "1", 100, 8).await;
        store.write_marker(&a, "loc").await.unwrap();
        tokio::fs::remove_file(&a).await.unwrap();

        assert_eq!(store.sweep_orphan_markers().await.unwrap(), 1);
        assert!(!marker_path(&a).exists());
    }

    #[tokio::test]
    async fn test_usage_counts_all_files() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::new(dir.path());
        write(&store, "1", 100, 100).await;
        write(&store, "2", 200, 50).await;

        let usage = store.usage().await.unwrap();
        assert_eq!(usage.files, 2);
        assert_eq!(usage.bytes, 150);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::new(dir.path().join("absent"));
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(store.usage().await.unwrap(), DirectoryUsage::default());
    }
}
