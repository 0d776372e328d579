//! Connectivity-gated sync loop.
//!
//! Each tick probes connectivity and, when online, runs in order:
//!
//! 1. Control document: apply a new relay command, note a credential update
//! 2. Credential change feed: apply changes since the cursor (from the start
//!    after an update signal), then acknowledge the signal
//! 3. Drain the transaction cache
//! 4. Re-queue unsent evidence
//!
//! Each step logs its own failure and the tick carries on with the next.

use crate::pipeline::{SyncReport, TransactionPipeline};
use crate::relay::RelayActuator;
use crate::upload::UploadQueue;
use gatehouse_core::{ReaderChannel, Result};
use gatehouse_network::{CloudClient, ConnectivityProbe, CredentialChange, RelayCommand};
use gatehouse_storage::CredentialRegistry;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub online: bool,
    pub relay_applied: Option<RelayCommand>,
    pub credential_changes: usize,
    pub sync: SyncReport,
    pub uploads_queued: usize,
}

#[derive(Debug, Default)]
struct FeedState {
    cursor: u64,
    last_command: Option<RelayCommand>,
    last_tick: Option<TickReport>,
}

pub struct SyncWorker {
    cloud: Arc<CloudClient>,
    registry: Arc<CredentialRegistry>,
    pipeline: Arc<TransactionPipeline>,
    uploads: Arc<UploadQueue>,
    relays: HashMap<ReaderChannel, Arc<RelayActuator>>,
    probe: ConnectivityProbe,
    pending_upload_limit: usize,
    state: Mutex<FeedState>,
    tick_guard: tokio::sync::Mutex<()>,
}

impl SyncWorker {
    pub fn new(
        cloud: Arc<CloudClient>,
        registry: Arc<CredentialRegistry>,
        pipeline: Arc<TransactionPipeline>,
        uploads: Arc<UploadQueue>,
        probe: ConnectivityProbe,
        pending_upload_limit: usize,
    ) -> Self {
        Self {
            cloud,
            registry,
            pipeline,
            uploads,
            relays: HashMap::new(),
            probe,
            pending_upload_limit,
            state: Mutex::new(FeedState::default()),
            tick_guard: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_relays(mut self, relays: impl IntoIterator<Item = Arc<RelayActuator>>) -> Self {
        self.relays
            .extend(relays.into_iter().map(|relay| (relay.channel(), relay)));
        self
    }

    pub fn last_tick(&self) -> Option<TickReport> {
        self.state.lock().last_tick.clone()
    }

    pub fn cursor(&self) -> u64 {
        self.state.lock().cursor
    }

    /// Run one tick. Concurrent callers (timer and manual trigger) take
    /// turns.
    pub async fn tick(&self) -> TickReport {
        let _tick = self.tick_guard.lock().await;
        let mut report = TickReport {
            online: self.probe.check().await,
            ..TickReport::default()
        };

        if !report.online {
            report.sync.remaining = self.pipeline.cache().len().await.unwrap_or(0);
            debug!(remaining = report.sync.remaining, "Offline, sync tick skipped");
            self.state.lock().last_tick = Some(report.clone());
            return report;
        }

        if self.cloud.is_enabled() {
            let reload = self.poll_control(&mut report).await;
            match self.pull_changes(reload).await {
                Ok(applied) => report.credential_changes = applied,
                Err(e) => warn!(error = %e, "Credential change feed failed"),
            }
        }

        match self.pipeline.drain_cache().await {
            Ok(sync) => report.sync = sync,
            Err(e) => warn!(error = %e, "Transaction sync failed"),
        }

        match self.uploads.enqueue_pending(self.pending_upload_limit).await {
            Ok(queued) => report.uploads_queued = queued,
            Err(e) => warn!(error = %e, "Evidence scan failed"),
        }

        self.state.lock().last_tick = Some(report.clone());
        report
    }

    /// Fetch the control document and apply a changed relay command.
    /// Returns whether credentials must be re-read from the start.
    async fn poll_control(&self, report: &mut TickReport) -> bool {
        let control = match self.cloud.fetch_control().await {
            Ok(control) => control,
            Err(e) => {
                warn!(error = %e, "Control document fetch failed");
                return false;
            }
        };

        if let Some(command) = control.relay_command {
            let changed = self.state.lock().last_command != Some(command);
            if changed && self.apply_command(command).await {
                self.state.lock().last_command = Some(command);
                report.relay_applied = Some(command);
            }
        }
        control.credentials_updated
    }

    /// Apply one remote relay command. Returns whether it took effect.
    pub async fn apply_command(&self, command: RelayCommand) -> bool {
        let Some(relay) = self.relays.get(&command.channel) else {
            warn!(channel = %command.channel, "Relay command for unknown channel");
            return false;
        };
        match relay.apply(command.action).await {
            Ok(state) => {
                info!(channel = %command.channel, action = %command.action, %state, "Remote relay command applied");
                true
            }
            Err(e) => {
                warn!(channel = %command.channel, action = %command.action, error = %e, "Remote relay command failed");
                false
            }
        }
    }

    async fn pull_changes(&self, reload: bool) -> Result<usize> {
        let cursor = if reload {
            info!("Credentials updated remotely, re-reading change feed");
            0
        } else {
            self.cursor()
        };

        let batch = self.cloud.poll_changes(cursor).await?;
        let applied = apply_changes(&self.registry, &batch.changes).await?;
        self.state.lock().cursor = batch.cursor;

        if reload {
            self.cloud.acknowledge_credentials_update().await?;
        }
        if applied > 0 {
            info!(applied, cursor = batch.cursor, "Credential changes applied");
        }
        Ok(applied)
    }

    /// Tick every `interval` until cancelled. The first tick runs at once.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "Sync loop started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("Sync loop stopped");
        Ok(())
    }
}

/// Apply feed changes with at most one save per store. Returns how many
/// changes altered a store.
pub async fn apply_changes(
    registry: &CredentialRegistry,
    changes: &[CredentialChange],
) -> Result<usize> {
    if changes.is_empty() {
        return Ok(0);
    }

    let mut credential_changes = 0;
    registry
        .update_credentials(|map| {
            for change in changes {
                match change {
                    CredentialChange::Upsert { card, credential } => {
                        if map.get(&card.to_string()) != Some(credential) {
                            map.insert(card.to_string(), credential.clone());
                            credential_changes += 1;
                        }
                    }
                    CredentialChange::Remove { card } => {
                        if map.remove(&card.to_string()).is_some() {
                            credential_changes += 1;
                        }
                    }
                    CredentialChange::SetBlocked { .. } => {}
                }
            }
            credential_changes > 0
        })
        .await?;

    let mut block_changes = 0;
    registry
        .update_block_list(|map| {
            for change in changes {
                if let CredentialChange::SetBlocked { card, blocked } = change {
                    let key = card.to_string();
                    let changed = if *blocked {
                        map.insert(key, true) != Some(true)
                    } else {
                        map.remove(&key).is_some()
                    };
                    if changed {
                        block_changes += 1;
                    }
                }
            }
            block_changes > 0
        })
        .await?;

    Ok(credential_changes + block_changes)
}
