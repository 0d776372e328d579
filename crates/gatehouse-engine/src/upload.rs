//! Evidence upload queue.
//!
//! One consumer uploads stills in queue order. The marker file is the only
//! record of a finished upload and is written after the remote side
//! confirmed, so a crash between the two only causes a re-upload. Jobs are
//! not persisted: anything dropped (offline, queue shut down) is found again
//! by [`UploadQueue::enqueue_pending`] on the next sync tick.

use crate::supervisor::SharedReceiver;
use gatehouse_core::Result;
use gatehouse_network::{
    AnyEvidenceUploader, CloudError, ConnectivityProbe, EvidenceUploader, RetryPolicy,
    check_uploadable,
};
use gatehouse_storage::EvidenceStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened to one upload job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Uploaded and marked; holds the remote location.
    Uploaded(String),
    /// File vanished before its turn.
    Missing,
    /// A marker already exists.
    AlreadyUploaded,
    /// Offline or uploader disabled; left for a later tick.
    Deferred,
    /// Not a regular file or over the size limit.
    Rejected,
    /// Upload or marker write failed after retries.
    Failed,
}

/// Counter snapshot for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadCounters {
    pub uploaded: u64,
    pub failed: u64,
    pub pending: usize,
}

#[derive(Debug)]
pub struct UploadQueue {
    store: EvidenceStore,
    uploader: AnyEvidenceUploader,
    probe: ConnectivityProbe,
    retry: RetryPolicy,
    tx: mpsc::UnboundedSender<PathBuf>,
    pending: Mutex<HashSet<PathBuf>>,
    uploaded: AtomicU64,
    failed: AtomicU64,
}

impl UploadQueue {
    /// Create the queue and the receiver for [`run`](Self::run).
    pub fn new(
        store: EvidenceStore,
        uploader: AnyEvidenceUploader,
        probe: ConnectivityProbe,
        retry: RetryPolicy,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PathBuf>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            store,
            uploader,
            probe,
            retry,
            tx,
            pending: Mutex::new(HashSet::new()),
            uploaded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });
        (queue, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.uploader.is_enabled()
    }

    pub fn counters(&self) -> UploadCounters {
        UploadCounters {
            uploaded: self.uploaded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            pending: self.pending.lock().len(),
        }
    }

    /// Queue a still unless it is already queued. Returns whether it was added.
    pub fn enqueue(&self, image: PathBuf) -> bool {
        if !self.is_enabled() {
            return false;
        }
        if !self.pending.lock().insert(image.clone()) {
            return false;
        }
        if self.tx.send(image.clone()).is_err() {
            self.pending.lock().remove(&image);
            debug!(path = %image.display(), "Upload queue closed");
            return false;
        }
        true
    }

    /// Queue up to `limit` unmarked stills, oldest first. Returns how many
    /// were newly queued.
    pub async fn enqueue_pending(&self, limit: usize) -> Result<usize> {
        if !self.is_enabled() {
            return Ok(0);
        }
        let files = self.store.pending(limit).await?;
        let queued = files
            .into_iter()
            .filter(|file| self.enqueue(file.path.clone()))
            .count();
        if queued > 0 {
            info!(queued, "Re-queued unsent evidence");
        }
        Ok(queued)
    }

    /// Upload one still and mark it.
    pub async fn process(&self, image: &Path) -> UploadOutcome {
        let outcome = self.try_upload(image).await;
        self.pending.lock().remove(image);
        outcome
    }

    async fn try_upload(&self, image: &Path) -> UploadOutcome {
        if !tokio::fs::try_exists(image).await.unwrap_or(false) {
            debug!(path = %image.display(), "Evidence gone before upload");
            return UploadOutcome::Missing;
        }
        if self.store.is_uploaded(image).await {
            return UploadOutcome::AlreadyUploaded;
        }
        if !self.is_enabled() || !self.probe.last_known() {
            debug!(path = %image.display(), "Offline, upload deferred");
            return UploadOutcome::Deferred;
        }
        if let Err(e) = check_uploadable(image).await {
            warn!(path = %image.display(), error = %e, "Evidence not uploadable");
            return UploadOutcome::Rejected;
        }

        let location = match self
            .retry
            .run("upload_evidence", || self.uploader.upload(image), CloudError::is_transient)
            .await
        {
            Ok(location) => location,
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(path = %image.display(), error = %e, "Evidence upload failed");
                return UploadOutcome::Failed;
            }
        };

        match self.store.write_marker(image, location.clone()).await {
            Ok(()) => {
                self.uploaded.fetch_add(1, Ordering::Relaxed);
                info!(path = %image.display(), %location, "Evidence uploaded");
                UploadOutcome::Uploaded(location)
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!(path = %image.display(), error = %e, "Uploaded but marker write failed");
                UploadOutcome::Failed
            }
        }
    }

    /// Consume the queue until cancelled.
    pub async fn run(
        self: Arc<Self>,
        rx: SharedReceiver<PathBuf>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut rx = rx.lock().await;
        info!(enabled = self.is_enabled(), "Upload consumer started");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(image) => {
                        self.process(&image).await;
                    }
                    None => break,
                },
            }
        }
        info!("Upload consumer stopped");
        Ok(())
    }
}
