//! Health and status reporting.

use crate::capture::CaptureCounters;
use crate::pipeline::PipelineCounters;
use crate::relay::RelayStatus;
use crate::sync::TickReport;
use crate::upload::UploadCounters;
use gatehouse_core::ReaderChannel;
use gatehouse_storage::{DiskSpace, EvictionReport};
use serde::Serialize;

/// Lifecycle of one configured reader channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ReaderState {
    Active,
    /// Never started: no edge source, or registration was refused.
    Disabled(String),
    /// The edge source failed after start.
    Failed(String),
}

impl ReaderState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReaderStatus {
    pub channel: ReaderChannel,
    #[serde(flatten)]
    pub state: ReaderState,
}

/// Which persisted stores exist on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilePresence {
    pub credentials: bool,
    pub block_list: bool,
    pub transaction_cache: bool,
    pub daily_stats: bool,
}

/// Snapshot of every component, for the administrative surface.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub version: &'static str,
    pub cloud_enabled: bool,
    pub uploader_enabled: bool,
    /// Result of the most recent connectivity probe.
    pub online: bool,
    pub readers: Vec<ReaderStatus>,
    pub relays: Vec<RelayStatus>,
    pub files: FilePresence,
    pub cached_transactions: usize,
    pub debounce_secs: u64,
    pub disk: Option<DiskSpace>,
    pub transactions: PipelineCounters,
    pub captures: CaptureCounters,
    pub uploads: UploadCounters,
    pub last_sync: Option<TickReport>,
    pub last_eviction: Option<EvictionReport>,
}

impl GatewayStatus {
    /// Names of components running degraded, empty when all is well.
    pub fn degraded(&self) -> Vec<String> {
        let mut degraded = Vec::new();
        if !self.cloud_enabled {
            degraded.push("cloud store disabled".to_string());
        }
        if !self.online {
            degraded.push("offline".to_string());
        }
        for reader in &self.readers {
            match &reader.state {
                ReaderState::Active => {}
                ReaderState::Disabled(reason) | ReaderState::Failed(reason) => {
                    degraded.push(format!("reader {}: {reason}", reader.channel));
                }
            }
        }
        for relay in self.relays.iter().filter(|r| !r.enabled) {
            degraded.push(format!("relay {} disabled", relay.channel));
        }
        degraded
    }

    pub fn is_healthy(&self) -> bool {
        self.degraded().is_empty()
    }
}
