//! Durable transaction pipeline.
//!
//! Every decision produces a [`Transaction`] that is handed to a single
//! consumer through an unbounded channel, so the decision path never waits.
//! The consumer writes it remotely when the gateway is online and caches it
//! locally otherwise, or when the remote write fails. A periodic sync pass
//! drains the cache in batches.
//!
//! Remote appends are keyed by the transaction id, so a write that timed
//! out after landing and is later re-sent does not create a second record.

use crate::supervisor::SharedReceiver;
use gatehouse_core::{Result, Transaction};
use gatehouse_network::{CloudClient, ConnectivityProbe};
use gatehouse_storage::TransactionCache;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Producer side of the pipeline; cheap to clone.
#[derive(Debug, Clone)]
pub struct TransactionSender {
    tx: mpsc::UnboundedSender<Transaction>,
}

impl TransactionSender {
    /// Queue a transaction without waiting. Returns `false` once the
    /// consumer has shut down.
    pub fn enqueue(&self, transaction: Transaction) -> bool {
        match self.tx.send(transaction) {
            Ok(()) => true,
            Err(mpsc::error::SendError(txn)) => {
                error!(id = %txn.id, card = %txn.card_id, "Transaction queue closed, record lost");
                false
            }
        }
    }
}

/// Create the producer handle and the receiver for [`TransactionPipeline::run`].
pub fn transaction_channel() -> (TransactionSender, mpsc::UnboundedReceiver<Transaction>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TransactionSender { tx }, rx)
}

/// Where the consumer put one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Remote,
    Cached,
    /// Neither write succeeded; logged.
    Lost,
}

/// Result of one cache drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Whether a drain ran at all (online and cloud enabled).
    pub attempted: bool,
    pub synced: usize,
    pub remaining: usize,
}

#[derive(Debug, Default)]
struct Counters {
    remote: AtomicU64,
    cached: AtomicU64,
    lost: AtomicU64,
}

/// Counter snapshot for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineCounters {
    pub remote: u64,
    pub cached: u64,
    pub lost: u64,
}

#[derive(Debug)]
pub struct TransactionPipeline {
    cloud: Arc<CloudClient>,
    cache: Arc<TransactionCache>,
    probe: ConnectivityProbe,
    batch_size: usize,
    batch_pause: Duration,
    drain_guard: tokio::sync::Mutex<()>,
    counters: Counters,
}

impl TransactionPipeline {
    pub fn new(
        cloud: Arc<CloudClient>,
        cache: Arc<TransactionCache>,
        probe: ConnectivityProbe,
        batch_size: usize,
        batch_pause: Duration,
    ) -> Self {
        Self {
            cloud,
            cache,
            probe,
            batch_size: batch_size.max(1),
            batch_pause,
            drain_guard: tokio::sync::Mutex::new(()),
            counters: Counters::default(),
        }
    }

    pub fn cache(&self) -> &TransactionCache {
        &self.cache
    }

    pub fn counters(&self) -> PipelineCounters {
        PipelineCounters {
            remote: self.counters.remote.load(Ordering::Relaxed),
            cached: self.counters.cached.load(Ordering::Relaxed),
            lost: self.counters.lost.load(Ordering::Relaxed),
        }
    }

    /// Deliver one transaction: remotely when the last probe said online,
    /// otherwise (or on any remote failure) into the local cache.
    pub async fn deliver(&self, transaction: Transaction) -> Delivery {
        if self.cloud.is_enabled() && self.probe.last_known() {
            match self.cloud.append_transaction(&transaction).await {
                Ok(()) => {
                    self.counters.remote.fetch_add(1, Ordering::Relaxed);
                    return Delivery::Remote;
                }
                Err(e) => {
                    warn!(id = %transaction.id, card = %transaction.card_id, error = %e, "Remote write failed, caching");
                }
            }
        }

        let id = transaction.id;
        match self.cache.append(transaction).await {
            Ok(()) => {
                debug!(%id, "Transaction cached");
                self.counters.cached.fetch_add(1, Ordering::Relaxed);
                Delivery::Cached
            }
            Err(e) => {
                error!(%id, error = %e, "Failed to cache transaction");
                self.counters.lost.fetch_add(1, Ordering::Relaxed);
                Delivery::Lost
            }
        }
    }

    /// Consume the queue until cancelled. Whatever is still queued at
    /// cancellation goes straight to the cache.
    pub async fn run(
        self: Arc<Self>,
        rx: SharedReceiver<Transaction>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut rx = rx.lock().await;
        info!("Transaction consumer started");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(transaction) => {
                        self.deliver(transaction).await;
                    }
                    None => break,
                },
            }
        }

        rx.close();
        let mut drained = 0;
        while let Ok(transaction) = rx.try_recv() {
            let id = transaction.id;
            if let Err(e) = self.cache.append(transaction).await {
                error!(%id, error = %e, "Failed to cache transaction at shutdown");
            }
            drained += 1;
        }
        info!(drained, "Transaction consumer stopped");
        Ok(())
    }

    /// Probe connectivity, then drain the cache if online.
    pub async fn sync_pass(&self) -> Result<SyncReport> {
        if !self.probe.check().await {
            debug!("Offline, sync pass skipped");
            return Ok(SyncReport {
                attempted: false,
                synced: 0,
                remaining: self.cache.len().await?,
            });
        }
        self.drain_cache().await
    }

    /// Push every cached transaction in batches and rewrite the cache to
    /// hold exactly the ones that failed.
    ///
    /// The caller is responsible for having checked connectivity.
    pub async fn drain_cache(&self) -> Result<SyncReport> {
        let _drain = self.drain_guard.lock().await;

        if !self.cloud.is_enabled() {
            return Ok(SyncReport {
                attempted: false,
                synced: 0,
                remaining: self.cache.len().await?,
            });
        }

        let cached = self.cache.load().await?;
        if cached.is_empty() {
            return Ok(SyncReport {
                attempted: true,
                ..SyncReport::default()
            });
        }

        info!(count = cached.len(), batch_size = self.batch_size, "Syncing cached transactions");
        let mut synced: HashSet<Uuid> = HashSet::new();
        for (index, batch) in cached.chunks(self.batch_size).enumerate() {
            if index > 0 && !self.batch_pause.is_zero() {
                tokio::time::sleep(self.batch_pause).await;
            }
            for transaction in batch {
                match self.cloud.append_transaction(transaction).await {
                    Ok(()) => {
                        synced.insert(transaction.id);
                    }
                    Err(e) => {
                        warn!(id = %transaction.id, error = %e, "Cached transaction still failing");
                    }
                }
            }
        }

        let remaining = if synced.is_empty() {
            self.cache.len().await?
        } else {
            self.cache.remove_synced(&synced).await?
        };

        info!(synced = synced.len(), remaining, "Sync pass complete");
        Ok(SyncReport {
            attempted: true,
            synced: synced.len(),
            remaining,
        })
    }
}
