//! Evidence capture.
//!
//! Each accepted scan dispatches a capture job for its channel's camera. A
//! small pool of workers drains the job queue so a burst of scans does not
//! serialise behind one slow camera. A grab is written to a `.part` file and
//! renamed into place, so a still is either complete or absent; finished
//! stills are handed to the upload queue.

#![allow(async_fn_in_trait)]

use crate::upload::UploadQueue;
use gatehouse_core::{CardId, ReaderChannel};
use gatehouse_storage::EvidenceStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest a single grab may take before it counts as a failed attempt.
const GRAB_TIMEOUT: Duration = Duration::from_secs(30);

/// Grabs one frame from a stream and writes it as a JPEG.
pub trait FrameGrabber: Send + Sync {
    async fn grab(&self, stream_url: &str, destination: &Path) -> io::Result<()>;
}

/// Shells out to `ffmpeg` (or a compatible program) for each grab.
#[derive(Debug, Clone)]
pub struct CommandGrabber {
    program: String,
}

impl CommandGrabber {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl FrameGrabber for CommandGrabber {
    async fn grab(&self, stream_url: &str, destination: &Path) -> io::Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(["-y", "-loglevel", "error", "-rtsp_transport", "tcp", "-i"])
            .arg(stream_url)
            .args(["-frames:v", "1", "-f", "mjpeg"])
            .arg(destination)
            .kill_on_drop(true);

        let output = tokio::time::timeout(GRAB_TIMEOUT, command.output())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "frame grab timed out"))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(io::Error::other(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Writes a fixed payload; can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct MockGrabber {
    state: Arc<Mutex<MockGrabberState>>,
}

#[derive(Debug, Default)]
struct MockGrabberState {
    fail_next: u32,
    grabs: Vec<String>,
}

impl MockGrabber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    /// Stream URLs of every attempt, failed ones included.
    pub fn grabs(&self) -> Vec<String> {
        self.state.lock().grabs.clone()
    }
}

impl FrameGrabber for MockGrabber {
    async fn grab(&self, stream_url: &str, destination: &Path) -> io::Result<()> {
        {
            let mut state = self.state.lock();
            state.grabs.push(stream_url.to_string());
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "camera offline"));
            }
        }
        tokio::fs::write(destination, b"\xFF\xD8mock-frame\xFF\xD9").await
    }
}

/// Enum wrapper for grabber dispatch.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AnyFrameGrabber {
    Command(CommandGrabber),
    Mock(MockGrabber),
}

impl FrameGrabber for AnyFrameGrabber {
    async fn grab(&self, stream_url: &str, destination: &Path) -> io::Result<()> {
        match self {
            Self::Command(grabber) => grabber.grab(stream_url, destination).await,
            Self::Mock(grabber) => grabber.grab(stream_url, destination).await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureJob {
    pub channel: ReaderChannel,
    pub card: CardId,
    pub captured_at: i64,
    pub stream_url: String,
}

/// Producer side of the capture queue; cheap to clone.
#[derive(Debug, Clone)]
pub struct CaptureDispatcher {
    tx: mpsc::Sender<CaptureJob>,
    cameras: Arc<HashMap<ReaderChannel, String>>,
}

impl CaptureDispatcher {
    /// Queue a capture without waiting. Returns `false` if the channel has
    /// no camera or the queue is full or closed.
    pub fn dispatch(&self, channel: ReaderChannel, card: CardId, captured_at: i64) -> bool {
        let Some(url) = self.cameras.get(&channel) else {
            debug!(%channel, "No camera configured, capture skipped");
            return false;
        };

        let job = CaptureJob {
            channel,
            card,
            captured_at,
            stream_url: url.clone(),
        };
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                warn!(channel = %job.channel, card = %job.card, "Capture queue full, capture dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%channel, "Capture queue closed");
                false
            }
        }
    }

    pub fn has_camera(&self, channel: ReaderChannel) -> bool {
        self.cameras.contains_key(&channel)
    }
}

/// Create the dispatcher and the receiver for [`CapturePool::spawn_workers`].
pub fn capture_channel(
    capacity: usize,
    cameras: HashMap<ReaderChannel, String>,
) -> (CaptureDispatcher, mpsc::Receiver<CaptureJob>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        CaptureDispatcher {
            tx,
            cameras: Arc::new(cameras),
        },
        rx,
    )
}

/// Counter snapshot for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureCounters {
    pub captured: u64,
    pub failed: u64,
}

#[derive(Debug)]
pub struct CapturePool {
    store: EvidenceStore,
    grabber: AnyFrameGrabber,
    max_attempts: u32,
    retry_delay: Duration,
    uploads: Option<Arc<UploadQueue>>,
    captured: AtomicU64,
    failed: AtomicU64,
}

impl CapturePool {
    pub fn new(
        store: EvidenceStore,
        grabber: AnyFrameGrabber,
        max_attempts: u32,
        retry_delay: Duration,
        uploads: Option<Arc<UploadQueue>>,
    ) -> Self {
        Self {
            store,
            grabber,
            max_attempts: max_attempts.max(1),
            retry_delay,
            uploads,
            captured: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn counters(&self) -> CaptureCounters {
        CaptureCounters {
            captured: self.captured.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Run one job to completion, retrying with a fixed delay.
    ///
    /// Returns the committed still, or `None` once attempts are exhausted.
    pub async fn capture(&self, job: &CaptureJob) -> Option<PathBuf> {
        let image = self
            .store
            .path_for(&job.card.to_string(), job.channel, job.captured_at);
        let partial = EvidenceStore::partial_path(&image);

        for attempt in 1..=self.max_attempts {
            let result = match self.grabber.grab(&job.stream_url, &partial).await {
                Ok(()) => self
                    .store
                    .commit_capture(&partial, &image)
                    .await
                    .map_err(|e| io::Error::other(e.to_string())),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    self.captured.fetch_add(1, Ordering::Relaxed);
                    info!(channel = %job.channel, card = %job.card, path = %image.display(), "Evidence captured");
                    return Some(image);
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&partial).await;
                    warn!(
                        channel = %job.channel,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Capture attempt failed"
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        self.failed.fetch_add(1, Ordering::Relaxed);
        error!(channel = %job.channel, card = %job.card, "Capture failed, attempts exhausted");
        None
    }

    /// Spawn `workers` tasks sharing the job receiver.
    pub fn spawn_workers(
        self: &Arc<Self>,
        rx: mpsc::Receiver<CaptureJob>,
        workers: usize,
        tasks: &mut JoinSet<()>,
        cancel: &CancellationToken,
    ) {
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker in 0..workers.max(1) {
            let pool = Arc::clone(self);
            let rx = Arc::clone(&rx);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                debug!(worker, "Capture worker started");
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => None,
                            job = rx.recv() => job,
                        }
                    };
                    let Some(job) = job else { break };

                    if let Some(image) = pool.capture(&job).await
                        && let Some(uploads) = &pool.uploads
                    {
                        uploads.enqueue(image);
                    }
                }
                debug!(worker, "Capture worker stopped");
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn job(card: u64) -> CaptureJob {
        CaptureJob {
            channel: ReaderChannel::new(1).unwrap(),
            card: CardId::new(card),
            captured_at: 1_700_000_000,
            stream_url: "rtsp://cam1/stream".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_writes_named_still() {
        let dir = TempDir::new().unwrap();
        let grabber = MockGrabber::new();
        let pool = CapturePool::new(
            EvidenceStore::new(dir.path()),
            AnyFrameGrabber::Mock(grabber.clone()),
            5,
            Duration::from_secs(5),
            None,
        );

        let image = pool.capture(&job(111111)).await.unwrap();
        assert_eq!(image.file_name().unwrap(), "111111_1700000000_1.jpg");
        assert!(image.exists());
        assert!(!EvidenceStore::partial_path(&image).exists());
        assert_eq!(pool.counters().captured, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_retries_then_succeeds() {
        let dir = TempDir::new().unwrap();
        let grabber = MockGrabber::new();
        grabber.fail_next(2);
        let pool = CapturePool::new(
            EvidenceStore::new(dir.path()),
            AnyFrameGrabber::Mock(grabber.clone()),
            5,
            Duration::from_secs(5),
            None,
        );

        assert!(pool.capture(&job(1)).await.is_some());
        assert_eq!(grabber.grabs().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_exhaustion_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let grabber = MockGrabber::new();
        grabber.fail_next(10);
        let pool = CapturePool::new(
            EvidenceStore::new(dir.path()),
            AnyFrameGrabber::Mock(grabber.clone()),
            3,
            Duration::from_secs(5),
            None,
        );

        assert!(pool.capture(&job(1)).await.is_none());
        assert_eq!(grabber.grabs().len(), 3);
        assert_eq!(pool.counters().failed, 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_without_camera() {
        let channel = ReaderChannel::new(2).unwrap();
        let (dispatcher, mut rx) = capture_channel(4, HashMap::new());

        assert!(!dispatcher.has_camera(channel));
        assert!(!dispatcher.dispatch(channel, CardId::new(1), 0));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_drops_when_full() {
        let channel = ReaderChannel::new(1).unwrap();
        let cameras = HashMap::from([(channel, "rtsp://cam1".to_string())]);
        let (dispatcher, _rx) = capture_channel(1, cameras);

        assert!(dispatcher.dispatch(channel, CardId::new(1), 0));
        assert!(!dispatcher.dispatch(channel, CardId::new(2), 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_drain_queue() {
        let dir = TempDir::new().unwrap();
        let channel = ReaderChannel::new(1).unwrap();
        let cameras = HashMap::from([(channel, "rtsp://cam1".to_string())]);
        let (dispatcher, rx) = capture_channel(8, cameras);
        let pool = Arc::new(CapturePool::new(
            EvidenceStore::new(dir.path()),
            AnyFrameGrabber::Mock(MockGrabber::new()),
            1,
            Duration::ZERO,
            None,
        ));
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        pool.spawn_workers(rx, 2, &mut tasks, &cancel);

        for card in 1..=4 {
            assert!(dispatcher.dispatch(channel, CardId::new(card), 1_700_000_000 + card as i64));
        }
        drop(dispatcher);
        while tasks.join_next().await.is_some() {}

        assert_eq!(pool.counters().captured, 4);
    }
}
