//! Gateway configuration.
//!
//! Loaded from an optional TOML file overlaid by `GATEHOUSE__SECTION__KEY`
//! environment variables. Every field has a default, so an empty file (or
//! none) yields a working two-reader gateway.

use ::config::{Config, ConfigError, Environment, File};
use gatehouse_core::constants::*;
use gatehouse_core::{Error, ReaderChannel, Result};
use gatehouse_network::ProbeConfig;
use gatehouse_network::connectivity::DEFAULT_ENDPOINTS;
use gatehouse_protocol::FrameLayout;
use gatehouse_storage::{EvictionPolicy, StoragePaths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,

    pub storage: StorageConfig,

    /// One entry per wired reader.
    pub readers: Vec<ChannelConfig>,

    /// Credential frame layout.
    pub frame: FrameLayout,

    pub decoder: DecoderConfig,
    pub decision: DecisionConfig,
    pub capture: CaptureConfig,
    pub sync: SyncConfig,
    pub connectivity: ConnectivityConfig,
    pub eviction: EvictionConfig,
    pub stats: StatsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            storage: StorageConfig::default(),
            readers: vec![
                ChannelConfig::new(1, 18, 23, 25),
                ChannelConfig::new(2, 19, 24, 26),
            ],
            frame: FrameLayout::default(),
            decoder: DecoderConfig::default(),
            decision: DecisionConfig::default(),
            capture: CaptureConfig::default(),
            sync: SyncConfig::default(),
            connectivity: ConnectivityConfig::default(),
            eviction: EvictionConfig::default(),
            stats: StatsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the JSON stores
    pub base_dir: PathBuf,

    /// Evidence directory; `<base_dir>/captured_images` when unset
    pub evidence_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("data"),
            evidence_dir: None,
        }
    }
}

impl StorageConfig {
    pub fn paths(&self) -> StoragePaths {
        let paths = StoragePaths::new(&self.base_dir);
        match &self.evidence_dir {
            Some(dir) => paths.evidence_dir(dir),
            None => paths,
        }
    }
}

/// Wiring of one reader channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel: u8,
    pub d0_pin: u8,
    pub d1_pin: u8,

    /// Relay driven by granted scans on this channel
    #[serde(default)]
    pub relay_pin: Option<u8>,

    /// Camera stream captured on every scan
    #[serde(default)]
    pub camera_url: Option<String>,
}

impl ChannelConfig {
    pub fn new(channel: u8, d0_pin: u8, d1_pin: u8, relay_pin: u8) -> Self {
        Self {
            channel,
            d0_pin,
            d1_pin,
            relay_pin: Some(relay_pin),
            camera_url: None,
        }
    }

    pub fn reader_channel(&self) -> Result<ReaderChannel> {
        ReaderChannel::new(self.channel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Inter-bit gap after which a partial frame is discarded
    pub timeout_ms: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_DECODER_TIMEOUT_MS,
        }
    }
}

impl DecoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Minimum interval between two accepted scans of one card
    pub debounce_secs: u64,

    /// Low time of a granted-scan relay pulse
    pub relay_pulse_ms: u64,

    /// Size of the recent-transactions ring
    pub recent_capacity: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            debounce_secs: DEFAULT_DEBOUNCE_SECS,
            relay_pulse_ms: DEFAULT_RELAY_PULSE_MS,
            recent_capacity: RECENT_TRANSACTIONS_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,

    /// Program used by the command grabber
    pub command: String,

    /// Pending capture jobs beyond which new ones are dropped
    pub queue_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_CAPTURE_WORKERS,
            max_attempts: DEFAULT_CAPTURE_MAX_ATTEMPTS,
            retry_delay_secs: DEFAULT_CAPTURE_RETRY_DELAY_SECS,
            command: "ffmpeg".to_string(),
            queue_capacity: 32,
        }
    }
}

impl CaptureConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_secs: u64,
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    pub pending_upload_limit: usize,

    /// Attempts per remote call before an item stays cached
    pub remote_attempts: u32,

    pub upload_max_attempts: u32,
    pub upload_retry_delay_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            batch_size: DEFAULT_SYNC_BATCH_SIZE,
            batch_pause_ms: DEFAULT_SYNC_BATCH_PAUSE_MS,
            pending_upload_limit: DEFAULT_PENDING_UPLOAD_LIMIT,
            remote_attempts: 3,
            upload_max_attempts: DEFAULT_CAPTURE_MAX_ATTEMPTS,
            upload_retry_delay_secs: DEFAULT_CAPTURE_RETRY_DELAY_SECS,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn upload_retry_delay(&self) -> Duration {
        Duration::from_secs(self.upload_retry_delay_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// `host:port` endpoints raced on every probe
    pub endpoints: Vec<String>,
    pub timeout_secs: u64,
    pub rounds: u32,
    pub round_pause_secs: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS.iter().map(ToString::to_string).collect(),
            timeout_secs: 5,
            rounds: 3,
            round_pause_secs: 2,
        }
    }
}

impl ConnectivityConfig {
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            endpoints: self.endpoints.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            rounds: self.rounds,
            round_pause: Duration::from_secs(self.round_pause_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    pub interval_secs: u64,
    pub ceiling_ratio: f64,
    pub cleanup_ratio: f64,
    pub fallback_ceiling_bytes: u64,
    pub fallback_cleanup_bytes: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_EVICTION_INTERVAL_SECS,
            ceiling_ratio: DEFAULT_CEILING_RATIO,
            cleanup_ratio: DEFAULT_CLEANUP_RATIO,
            fallback_ceiling_bytes: FALLBACK_CEILING_BYTES,
            fallback_cleanup_bytes: FALLBACK_CLEANUP_BYTES,
        }
    }
}

impl EvictionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            ceiling_ratio: self.ceiling_ratio,
            cleanup_ratio: self.cleanup_ratio,
            fallback_ceiling: self.fallback_ceiling_bytes,
            fallback_cleanup: self.fallback_cleanup_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub retention_days: u32,
    pub flush_interval_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_STATS_RETENTION_DAYS,
            flush_interval_secs: 10,
        }
    }
}

impl StatsConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

impl GatewayConfig {
    /// Load configuration.
    ///
    /// Sources, later overriding earlier:
    /// 1. Built-in defaults
    /// 2. The TOML file at `path`, if given (must exist)
    /// 3. Environment variables (e.g. `GATEHOUSE__DECISION__DEBOUNCE_SECS=30`)
    pub fn load(path: Option<&Path>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder
            .add_source(
                Environment::with_prefix("GATEHOUSE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Reject values the gateway cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.frame.validate()?;

        let mut seen = Vec::new();
        for reader in &self.readers {
            let channel = reader.reader_channel()?;
            if seen.contains(&channel) {
                return Err(Error::configuration(format!(
                    "readers: channel {channel} configured twice"
                )));
            }
            seen.push(channel);
            if reader.d0_pin == reader.d1_pin {
                return Err(Error::configuration(format!(
                    "readers: channel {channel} uses pin {} for both data lines",
                    reader.d0_pin
                )));
            }
        }

        if self.capture.workers == 0 {
            return Err(Error::configuration("capture.workers must be at least 1"));
        }
        if self.capture.max_attempts == 0 {
            return Err(Error::configuration("capture.max_attempts must be at least 1"));
        }
        if self.sync.batch_size == 0 {
            return Err(Error::configuration("sync.batch_size must be at least 1"));
        }
        if self.sync.interval_secs == 0 || self.eviction.interval_secs == 0 {
            return Err(Error::configuration("sync and eviction intervals must be non-zero"));
        }
        if self.decision.recent_capacity == 0 {
            return Err(Error::configuration("decision.recent_capacity must be at least 1"));
        }
        for (field, ratio) in [
            ("eviction.ceiling_ratio", self.eviction.ceiling_ratio),
            ("eviction.cleanup_ratio", self.eviction.cleanup_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(Error::configuration(format!(
                    "{field} must be in (0, 1], got {ratio}"
                )));
            }
        }
        if self.stats.retention_days == 0 {
            return Err(Error::configuration("stats.retention_days must be at least 1"));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.decision.debounce_secs)
    }

    pub fn relay_pulse(&self) -> Duration {
        Duration::from_millis(self.decision.relay_pulse_ms)
    }
}
