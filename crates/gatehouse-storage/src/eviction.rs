//! Disk-pressure eviction of evidence stills.
//!
//! Each pass measures the evidence directory, derives a ceiling from the
//! free space reported *now* and, when usage has reached it, deletes stills
//! strictly oldest first until the cleanup target has been freed. The
//! thresholds are recomputed every pass, so they drift with unrelated disk
//! usage on the same volume.

use crate::error::StorageResult;
use crate::evidence::EvidenceStore;
use gatehouse_core::constants::{
    DEFAULT_CEILING_RATIO, DEFAULT_CLEANUP_RATIO, FALLBACK_CEILING_BYTES, FALLBACK_CLEANUP_BYTES,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Volume capacity as reported by the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskSpace {
    pub total: u64,
    pub free: u64,
}

/// Reports free space for the volume holding a path.
pub trait DiskProbe: Send + Sync {
    fn space(&self, path: &Path) -> io::Result<DiskSpace>;
}

/// Probe backed by `statvfs`/`GetDiskFreeSpaceEx`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDiskProbe;

impl DiskProbe for FsDiskProbe {
    fn space(&self, path: &Path) -> io::Result<DiskSpace> {
        Ok(DiskSpace {
            total: fs2::total_space(path)?,
            free: fs2::available_space(path)?,
        })
    }
}

/// Probe returning a settable value; `None` simulates a probe failure.
#[derive(Debug, Clone, Default)]
pub struct FixedDiskProbe {
    space: Arc<Mutex<Option<DiskSpace>>>,
}

impl FixedDiskProbe {
    pub fn new(total: u64, free: u64) -> Self {
        Self {
            space: Arc::new(Mutex::new(Some(DiskSpace { total, free }))),
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    pub fn set(&self, space: Option<DiskSpace>) {
        *self.space.lock() = space;
    }
}

impl DiskProbe for FixedDiskProbe {
    fn space(&self, _path: &Path) -> io::Result<DiskSpace> {
        (*self.space.lock()).ok_or_else(|| io::Error::other("disk probe unavailable"))
    }
}

/// Ratios and fallbacks used to derive thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionPolicy {
    /// Share of current free space the directory may occupy.
    pub ceiling_ratio: f64,
    /// Share of the ceiling to free once it is reached.
    pub cleanup_ratio: f64,
    pub fallback_ceiling: u64,
    pub fallback_cleanup: u64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            ceiling_ratio: DEFAULT_CEILING_RATIO,
            cleanup_ratio: DEFAULT_CLEANUP_RATIO,
            fallback_ceiling: FALLBACK_CEILING_BYTES,
            fallback_cleanup: FALLBACK_CLEANUP_BYTES,
        }
    }
}

/// Thresholds for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Thresholds {
    pub ceiling: u64,
    pub target: u64,
    /// False when the fallbacks were used.
    pub probed: bool,
}

impl EvictionPolicy {
    pub fn thresholds(&self, space: Option<DiskSpace>) -> Thresholds {
        match space {
            Some(space) => {
                let ceiling = (space.free as f64 * self.ceiling_ratio) as u64;
                Thresholds {
                    ceiling,
                    target: (ceiling as f64 * self.cleanup_ratio) as u64,
                    probed: true,
                }
            }
            None => Thresholds {
                ceiling: self.fallback_ceiling,
                target: self.fallback_cleanup,
                probed: false,
            },
        }
    }
}

/// What one pass saw and did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub usage: u64,
    pub ceiling: u64,
    pub target: u64,
    pub freed: u64,
    pub deleted: Vec<PathBuf>,
    pub orphan_markers: usize,
}

impl EvictionReport {
    pub fn triggered(&self) -> bool {
        self.usage > 0 && self.usage >= self.ceiling
    }
}

pub struct EvictionMonitor {
    store: EvidenceStore,
    probe: Arc<dyn DiskProbe>,
    policy: EvictionPolicy,
}

impl std::fmt::Debug for EvictionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictionMonitor")
            .field("dir", &self.store.dir())
            .field("policy", &self.policy)
            .finish()
    }
}

impl EvictionMonitor {
    pub fn new(store: EvidenceStore, probe: Arc<dyn DiskProbe>, policy: EvictionPolicy) -> Self {
        Self {
            store,
            probe,
            policy,
        }
    }

    pub fn store(&self) -> &EvidenceStore {
        &self.store
    }

    /// Current free/total space of the evidence volume, if it can be probed.
    pub async fn disk_space(&self) -> Option<DiskSpace> {
        let probe = self.probe.clone();
        let dir = self.store.dir().to_path_buf();
        match tokio::task::spawn_blocking(move || probe.space(&dir)).await {
            Ok(Ok(space)) => Some(space),
            Ok(Err(e)) => {
                warn!(error = %e, "Free-space probe failed, using fallback thresholds");
                None
            }
            Err(e) => {
                warn!(error = %e, "Free-space probe task failed, using fallback thresholds");
                None
            }
        }
    }

    /// Run one eviction pass to completion.
    pub async fn run_pass(&self) -> StorageResult<EvictionReport> {
        let usage = self.store.usage().await?.bytes;
        let thresholds = self.policy.thresholds(self.disk_space().await);

        let mut report = EvictionReport {
            usage,
            ceiling: thresholds.ceiling,
            target: thresholds.target,
            ..Default::default()
        };

        if report.triggered() {
            info!(
                usage,
                ceiling = thresholds.ceiling,
                target = thresholds.target,
                "Evidence usage reached ceiling, evicting oldest files"
            );
            for file in self.store.list_oldest_first().await? {
                // A triggered pass always removes at least the oldest file.
                if !report.deleted.is_empty() && report.freed >= thresholds.target {
                    break;
                }
                match self.store.delete(&file.path).await {
                    Ok(freed) => {
                        report.freed += freed;
                        report.deleted.push(file.path);
                    }
                    Err(e) => {
                        // Skipping ahead would evict a newer file first.
                        warn!(path = %file.path.display(), error = %e, "Eviction stopped at undeletable file");
                        break;
                    }
                }
            }
            info!(deleted = report.deleted.len(), freed = report.freed, "Eviction pass finished");
        } else {
            debug!(usage, ceiling = thresholds.ceiling, "Evidence usage below ceiling");
        }

        report.orphan_markers = self.store.sweep_orphan_markers().await?;
        Ok(report)
    }
}
