//! Gateway wiring and lifecycle.
//!
//! [`Gateway::start`] opens the stores, builds every component from
//! [`GatewayConfig`] and the supplied devices, then spawns the long-lived
//! workers:
//!
//! | worker | supervised | drives |
//! |---|---|---|
//! | frame dispatch | no | reader events into the decision engine |
//! | transactions | yes | [`TransactionPipeline::run`] |
//! | uploads | yes | [`UploadQueue::run`] |
//! | sync | yes | [`SyncWorker::run`] |
//! | eviction | yes | [`run_eviction`] |
//! | stats | yes | [`StatsKeeper::run`] |
//! | capture (x N) | no | [`CapturePool::spawn_workers`] |
//!
//! Only an uncreatable storage layout aborts startup. A missing device or
//! collaborator disables that component and the rest keeps running.

use crate::admin::AdminService;
use crate::capture::{AnyFrameGrabber, CapturePool, CommandGrabber, capture_channel};
use crate::config::GatewayConfig;
use crate::decision::DecisionEngine;
use crate::maintenance::{StatsKeeper, run_eviction};
use crate::pipeline::{TransactionPipeline, transaction_channel};
use crate::rate_limiter::ScanRateLimiter;
use crate::recent::RecentTransactions;
use crate::relay::RelayActuator;
use crate::status::{FilePresence, GatewayStatus, ReaderState, ReaderStatus};
use crate::supervisor::{RestartPolicy, shared, supervise};
use crate::sync::SyncWorker;
use crate::upload::UploadQueue;
use gatehouse_core::{Error, ReaderChannel, Result};
use gatehouse_hardware::{
    AnyEdgeSource, AnyRelayOutput, ChannelPins, ReaderConfig, ReaderEvent, ReaderHandle,
    ReaderManager,
};
use gatehouse_network::{
    AnyCloudStore, AnyEvidenceUploader, CloudClient, ConnectivityProbe, RetryPolicy,
};
use gatehouse_storage::{
    CredentialRegistry, DailyStats, DiskProbe, EvictionMonitor, EvictionReport, EvidenceStore,
    FsDiskProbe, TransactionCache,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const READER_EVENT_CAPACITY: usize = 64;
const REMOTE_BACKOFF_BASE: Duration = Duration::from_millis(500);
const REMOTE_BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Devices and collaborators handed to [`Gateway::start`].
///
/// Everything defaults to "absent": no edge sources, no relay outputs, no
/// cloud store and no uploader. Frames are grabbed with the configured
/// command and connectivity is probed against the configured endpoints.
pub struct GatewayParts {
    readers: HashMap<ReaderChannel, AnyEdgeSource>,
    relays: HashMap<ReaderChannel, AnyRelayOutput>,
    cloud: AnyCloudStore,
    uploader: AnyEvidenceUploader,
    grabber: AnyFrameGrabber,
    probe: ConnectivityProbe,
    disk_probe: Arc<dyn DiskProbe>,
}

impl GatewayParts {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            readers: HashMap::new(),
            relays: HashMap::new(),
            cloud: AnyCloudStore::Disabled,
            uploader: AnyEvidenceUploader::Disabled,
            grabber: AnyFrameGrabber::Command(CommandGrabber::new(config.capture.command.clone())),
            probe: ConnectivityProbe::endpoints(config.connectivity.probe_config()),
            disk_probe: Arc::new(FsDiskProbe),
        }
    }

    #[must_use]
    pub fn with_reader(mut self, channel: ReaderChannel, source: AnyEdgeSource) -> Self {
        self.readers.insert(channel, source);
        self
    }

    #[must_use]
    pub fn with_relay(mut self, channel: ReaderChannel, output: AnyRelayOutput) -> Self {
        self.relays.insert(channel, output);
        self
    }

    #[must_use]
    pub fn with_cloud(mut self, cloud: AnyCloudStore) -> Self {
        self.cloud = cloud;
        self
    }

    #[must_use]
    pub fn with_uploader(mut self, uploader: AnyEvidenceUploader) -> Self {
        self.uploader = uploader;
        self
    }

    #[must_use]
    pub fn with_grabber(mut self, grabber: AnyFrameGrabber) -> Self {
        self.grabber = grabber;
        self
    }

    #[must_use]
    pub fn with_probe(mut self, probe: ConnectivityProbe) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn with_disk_probe(mut self, probe: Arc<dyn DiskProbe>) -> Self {
        self.disk_probe = probe;
        self
    }
}

/// Everything the administrative and status surfaces reach into.
pub(crate) struct Components {
    pub(crate) registry: Arc<CredentialRegistry>,
    pub(crate) stats: Arc<DailyStats>,
    pub(crate) limiter: Arc<ScanRateLimiter>,
    pub(crate) recent: Arc<RecentTransactions>,
    pub(crate) relays: BTreeMap<ReaderChannel, Arc<RelayActuator>>,
    pub(crate) pipeline: Arc<TransactionPipeline>,
    pub(crate) uploads: Arc<UploadQueue>,
    pub(crate) capture: Arc<CapturePool>,
    pub(crate) sync: Arc<SyncWorker>,
    pub(crate) evidence: EvidenceStore,
    pub(crate) eviction: Arc<EvictionMonitor>,
    pub(crate) last_eviction: Arc<Mutex<Option<EvictionReport>>>,
    pub(crate) cloud: Arc<CloudClient>,
    pub(crate) probe: ConnectivityProbe,
    readers: Mutex<BTreeMap<ReaderChannel, ReaderState>>,
}

impl Components {
    fn set_reader_state(&self, channel: ReaderChannel, state: ReaderState) {
        self.readers.lock().insert(channel, state);
    }

    pub(crate) async fn status(&self) -> GatewayStatus {
        let cached_transactions = match self.pipeline.cache().len().await {
            Ok(len) => len,
            Err(e) => {
                warn!(error = %e, "Failed to read transaction cache for status");
                0
            }
        };

        let files = FilePresence {
            credentials: file_exists(self.registry.credentials_path()).await,
            block_list: file_exists(self.registry.block_list_path()).await,
            transaction_cache: file_exists(self.pipeline.cache().path()).await,
            daily_stats: file_exists(self.stats.path()).await,
        };

        let readers = self
            .readers
            .lock()
            .iter()
            .map(|(channel, state)| ReaderStatus {
                channel: *channel,
                state: state.clone(),
            })
            .collect();

        GatewayStatus {
            version: gatehouse_core::VERSION,
            cloud_enabled: self.cloud.is_enabled(),
            uploader_enabled: self.uploads.is_enabled(),
            online: self.probe.last_known(),
            readers,
            relays: self.relays.values().map(|relay| relay.status()).collect(),
            files,
            cached_transactions,
            debounce_secs: self.limiter.interval().as_secs(),
            disk: self.eviction.disk_space().await,
            transactions: self.pipeline.counters(),
            captures: self.capture.counters(),
            uploads: self.uploads.counters(),
            last_sync: self.sync.last_tick(),
            last_eviction: self.last_eviction.lock().clone(),
        }
    }
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// A running gateway.
pub struct Gateway {
    components: Arc<Components>,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl Gateway {
    /// Build and start every component.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` if `config` does not validate,
    /// `Error::FatalStartup` if the storage layout cannot be created, and
    /// whatever opening an existing store returns.
    pub async fn start(config: GatewayConfig, parts: GatewayParts) -> Result<Self> {
        config.validate()?;

        let paths = config.storage.paths();
        paths.ensure_dirs().await.map_err(|e| {
            Error::fatal_startup(format!(
                "cannot create storage under {}: {e}",
                paths.base_dir.display()
            ))
        })?;
        info!(base_dir = %paths.base_dir.display(), "Storage ready");

        let GatewayParts {
            readers: mut sources,
            relays: mut outputs,
            cloud,
            uploader,
            grabber,
            probe,
            disk_probe,
        } = parts;

        let registry = Arc::new(CredentialRegistry::open(&paths).await?);
        let stats = Arc::new(DailyStats::open(paths.daily_stats_file(), config.stats.retention_days).await?);
        let cache = Arc::new(TransactionCache::new(paths.transaction_cache_file()));
        let evidence = EvidenceStore::new(&paths.evidence_dir);

        let cloud = Arc::new(CloudClient::new(
            cloud,
            RetryPolicy::exponential(config.sync.remote_attempts, REMOTE_BACKOFF_BASE, REMOTE_BACKOFF_MAX),
        ));
        if !cloud.is_enabled() {
            warn!("No cloud store configured, transactions stay cached locally");
        }

        let limiter = Arc::new(ScanRateLimiter::new(config.debounce()));
        let recent = Arc::new(RecentTransactions::new(config.decision.recent_capacity));

        let mut relays = BTreeMap::new();
        let mut cameras = HashMap::new();
        for reader in &config.readers {
            let channel = reader.reader_channel()?;
            let output = match (outputs.remove(&channel), reader.relay_pin) {
                (Some(output), _) => output,
                (None, Some(pin)) => {
                    warn!(%channel, pin, "No relay output available, relay disabled");
                    AnyRelayOutput::disabled(pin)
                }
                (None, None) => continue,
            };
            relays.insert(channel, RelayActuator::new(channel, output, config.relay_pulse()));
            if let Some(url) = &reader.camera_url {
                cameras.insert(channel, url.clone());
            }
        }

        let (uploads, upload_rx) = UploadQueue::new(
            evidence.clone(),
            uploader,
            probe.clone(),
            RetryPolicy::fixed(config.sync.upload_max_attempts, config.sync.upload_retry_delay()),
        );
        let (dispatcher, capture_rx) = capture_channel(config.capture.queue_capacity, cameras);
        let capture = Arc::new(CapturePool::new(
            evidence.clone(),
            grabber,
            config.capture.max_attempts,
            config.capture.retry_delay(),
            uploads.is_enabled().then(|| uploads.clone()),
        ));

        let pipeline = Arc::new(TransactionPipeline::new(
            cloud.clone(),
            cache,
            probe.clone(),
            config.sync.batch_size,
            config.sync.batch_pause(),
        ));
        let (sender, transaction_rx) = transaction_channel();

        let mut engine = DecisionEngine::new(
            config.frame,
            registry.clone(),
            limiter.clone(),
            stats.clone(),
            sender,
            recent.clone(),
        )
        .with_capture(dispatcher);
        for relay in relays.values() {
            engine = engine.with_relay(relay.clone());
        }

        let sync = Arc::new(
            SyncWorker::new(
                cloud.clone(),
                registry.clone(),
                pipeline.clone(),
                uploads.clone(),
                probe.clone(),
                config.sync.pending_upload_limit,
            )
            .with_relays(relays.values().cloned()),
        );

        let eviction = Arc::new(EvictionMonitor::new(
            evidence.clone(),
            disk_probe,
            config.eviction.policy(),
        ));

        let mut manager = ReaderManager::new(ReaderConfig {
            frame_width: config.frame.width,
            decoder_timeout: config.decoder.timeout(),
            event_capacity: READER_EVENT_CAPACITY,
        });
        let mut reader_states = BTreeMap::new();
        for reader in &config.readers {
            let channel = reader.reader_channel()?;
            let state = match sources.remove(&channel) {
                None => ReaderState::Disabled("no edge source".to_string()),
                Some(source) => {
                    match manager.register(channel, ChannelPins::new(reader.d0_pin, reader.d1_pin), source) {
                        Ok(()) => ReaderState::Active,
                        Err(e) => ReaderState::Disabled(e.to_string()),
                    }
                }
            };
            if let ReaderState::Disabled(reason) = &state {
                warn!(%channel, %reason, "Reader disabled");
            }
            reader_states.insert(channel, state);
        }
        for channel in sources.keys() {
            warn!(%channel, "Edge source supplied for unconfigured channel, ignored");
        }

        let components = Arc::new(Components {
            registry,
            stats: stats.clone(),
            limiter: limiter.clone(),
            recent,
            relays,
            pipeline: pipeline.clone(),
            uploads: uploads.clone(),
            capture: capture.clone(),
            sync: sync.clone(),
            evidence,
            eviction: eviction.clone(),
            last_eviction: Arc::new(Mutex::new(None)),
            cloud,
            probe,
            readers: Mutex::new(reader_states),
        });

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        tasks.spawn(dispatch_frames(
            engine,
            manager.start(),
            components.clone(),
            cancel.clone(),
        ));

        let transaction_rx = shared(transaction_rx);
        spawn_supervised(&mut tasks, "transactions", &cancel, {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            move || pipeline.clone().run(transaction_rx.clone(), cancel.clone())
        });

        let upload_rx = shared(upload_rx);
        spawn_supervised(&mut tasks, "uploads", &cancel, {
            let uploads = uploads.clone();
            let cancel = cancel.clone();
            move || uploads.clone().run(upload_rx.clone(), cancel.clone())
        });

        let sync_interval = config.sync.interval();
        spawn_supervised(&mut tasks, "sync", &cancel, {
            let cancel = cancel.clone();
            move || sync.clone().run(sync_interval, cancel.clone())
        });

        let eviction_interval = config.eviction.interval();
        spawn_supervised(&mut tasks, "eviction", &cancel, {
            let last = components.last_eviction.clone();
            let cancel = cancel.clone();
            move || run_eviction(eviction.clone(), eviction_interval, last.clone(), cancel.clone())
        });

        let keeper = Arc::new(StatsKeeper::new(stats, limiter));
        let flush_interval = config.stats.flush_interval();
        spawn_supervised(&mut tasks, "stats", &cancel, {
            let cancel = cancel.clone();
            move || keeper.clone().run(flush_interval, cancel.clone())
        });

        capture.spawn_workers(capture_rx, config.capture.workers, &mut tasks, &cancel);

        info!(
            readers = config.readers.len(),
            relays = components.relays.len(),
            capture_workers = config.capture.workers,
            "Gateway started"
        );

        Ok(Self {
            components,
            cancel,
            tasks,
        })
    }

    pub fn admin(&self) -> AdminService {
        AdminService::new(self.components.clone())
    }

    pub async fn status(&self) -> GatewayStatus {
        self.components.status().await
    }

    /// Token that stops the gateway when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every worker and wait for them. Queued transactions are cached
    /// and statistics flushed before this returns.
    pub async fn shutdown(mut self) {
        info!("Gateway shutting down");
        self.cancel.cancel();

        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result
                && e.is_panic()
            {
                error!("Worker panicked during shutdown");
            }
        }

        if let Err(e) = self.components.stats.flush().await {
            warn!(error = %e, "Final stats flush failed");
        }
        info!("Gateway stopped");
    }
}

fn spawn_supervised<F, Fut>(
    tasks: &mut JoinSet<()>,
    name: &'static str,
    cancel: &CancellationToken,
    make: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let cancel = cancel.clone();
    tasks.spawn(async move {
        let restarts = supervise(name, RestartPolicy::default(), cancel, make).await;
        debug!(worker = name, restarts, "Supervised worker finished");
    });
}

/// Feed reader events into the decision engine until cancelled, then
/// release the readers.
async fn dispatch_frames(
    engine: DecisionEngine,
    mut readers: ReaderHandle,
    components: Arc<Components>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = readers.recv() => match event {
                Some(ReaderEvent::Frame { channel, frame }) => {
                    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        engine.process_frame(channel, &frame)
                    }));
                    if outcome.is_err() {
                        error!(%channel, "Decision panicked, scan dropped");
                    }
                }
                Some(ReaderEvent::DeviceError { channel, error }) => {
                    error!(%channel, %error, "Reader failed");
                    components.set_reader_state(channel, ReaderState::Failed(error));
                }
                Some(other) => debug!(?other, "Unhandled reader event"),
                None => {
                    debug!("No reader channels running");
                    cancel.cancelled().await;
                    break;
                }
            },
        }
    }

    if let Err(e) = readers.shutdown().await {
        warn!(error = %e, "Reader shutdown failed");
    }
    debug!("Frame dispatch stopped");
}
