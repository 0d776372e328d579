//! Integration tests for the eviction monitor.
//!
//! Disk space is simulated with [`FixedDiskProbe`]; the evidence directory is
//! a real temporary directory.
//!
//! Run with: cargo test --package gatehouse-storage --test eviction_integration

use gatehouse_core::ReaderChannel;
use gatehouse_storage::evidence::marker_path;
use gatehouse_storage::{EvictionMonitor, EvictionPolicy, EvidenceStore, FixedDiskProbe};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const FILE_SIZE: usize = 1000;

async fn populate(store: &EvidenceStore, timestamps: &[i64]) -> Vec<PathBuf> {
    let channel = ReaderChannel::new(1).unwrap();
    let mut paths = Vec::new();
    for ts in timestamps {
        let path = store.path_for(&format!("{ts}"), channel, *ts);
        tokio::fs::write(&path, vec![7u8; FILE_SIZE]).await.unwrap();
        paths.push(path);
    }
    paths
}

fn monitor(dir: &TempDir, probe: FixedDiskProbe) -> EvictionMonitor {
    EvictionMonitor::new(
        EvidenceStore::new(dir.path()),
        Arc::new(probe),
        EvictionPolicy::default(),
    )
}

#[tokio::test]
async fn test_below_ceiling_deletes_nothing() {
    let dir = TempDir::new().unwrap();
    let monitor = monitor(&dir, FixedDiskProbe::new(1_000_000, 100_000));
    populate(monitor.store(), &[1, 2, 3]).await;

    let report = monitor.run_pass().await.unwrap();
    assert!(!report.triggered());
    assert!(report.deleted.is_empty());
    assert_eq!(report.ceiling, 60_000);
}

#[tokio::test]
async fn test_evicts_oldest_until_target() {
    let dir = TempDir::new().unwrap();
    // free 10_000 -> ceiling 6_000, target 1_800: two 1_000-byte files.
    let monitor = monitor(&dir, FixedDiskProbe::new(100_000, 10_000));
    // Written out of order so directory order does not match age.
    let paths = populate(monitor.store(), &[500, 100, 900, 300, 700, 200, 800]).await;
    for path in &paths {
        monitor.store().write_marker(path, "remote").await.unwrap();
    }

    let report = monitor.run_pass().await.unwrap();
    assert!(report.triggered());
    assert_eq!(report.target, 1_800);
    assert!(report.freed >= report.target);

    let remaining: Vec<i64> = monitor
        .store()
        .list_oldest_first()
        .await
        .unwrap()
        .iter()
        .filter_map(|f| f.captured_at)
        .collect();
    assert_eq!(remaining, vec![300, 500, 700, 800, 900]);

    for deleted in &report.deleted {
        assert!(!deleted.exists());
        assert!(!marker_path(deleted).exists());
    }
}

#[tokio::test]
async fn test_never_deletes_newer_before_older() {
    let dir = TempDir::new().unwrap();
    let monitor = monitor(&dir, FixedDiskProbe::new(100_000, 5_000));
    populate(monitor.store(), &[40, 10, 30, 20, 60, 50]).await;

    let report = monitor.run_pass().await.unwrap();
    let deleted: Vec<i64> = report
        .deleted
        .iter()
        .map(|p| {
            p.file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.split('_').nth(1))
                .and_then(|ts| ts.parse().ok())
                .unwrap()
        })
        .collect();

    let mut sorted = deleted.clone();
    sorted.sort_unstable();
    assert_eq!(deleted, sorted);

    let newest_deleted = deleted.iter().max().copied().unwrap_or(i64::MIN);
    for file in monitor.store().list().await.unwrap() {
        assert!(file.timestamp() > newest_deleted);
    }
}

#[tokio::test]
async fn test_probe_failure_uses_fallback() {
    let dir = TempDir::new().unwrap();
    let monitor = monitor(&dir, FixedDiskProbe::failing());
    populate(monitor.store(), &[1]).await;

    let report = monitor.run_pass().await.unwrap();
    assert!(!report.triggered());
    assert_eq!(report.ceiling, gatehouse_core::constants::FALLBACK_CEILING_BYTES);
}

#[tokio::test]
async fn test_thresholds_follow_free_space_each_pass() {
    let dir = TempDir::new().unwrap();
    let probe = FixedDiskProbe::new(100_000, 100_000);
    let monitor = monitor(&dir, probe.clone());
    populate(monitor.store(), &[1, 2, 3]).await;

    assert!(!monitor.run_pass().await.unwrap().triggered());

    probe.set(Some(gatehouse_storage::DiskSpace {
        total: 100_000,
        free: 4_000,
    }));
    let report = monitor.run_pass().await.unwrap();
    assert_eq!(report.ceiling, 2_400);
    assert!(report.triggered());
    assert_eq!(report.deleted.len(), 1);
}

#[tokio::test]
async fn test_full_disk_still_evicts_oldest() {
    let dir = TempDir::new().unwrap();
    let monitor = monitor(&dir, FixedDiskProbe::new(100_000, 0));
    populate(monitor.store(), &[30, 10, 20]).await;

    let report = monitor.run_pass().await.unwrap();
    assert!(report.triggered());
    assert_eq!(report.target, 0);
    assert_eq!(report.deleted.len(), 1);
    let oldest = report.deleted[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(oldest.starts_with("10_"), "{oldest}");
}
