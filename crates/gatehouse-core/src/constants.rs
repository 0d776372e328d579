//! Default values shared across the gateway.
//!
//! Runtime configuration overrides most of these; they are the values a
//! freshly installed two-reader gateway starts with.
//!
//! ```
//! use gatehouse_core::constants::*;
//!
//! assert_eq!(DEFAULT_FRAME_WIDTH, 26);
//! assert_eq!(DEFAULT_FRAME_WIDTH - DEFAULT_LEADING_GUARD_BITS - DEFAULT_TRAILING_GUARD_BITS, 24);
//! ```

// ============================================================================
// Readers and frames
// ============================================================================

/// Lowest valid reader channel number.
pub const MIN_READER_CHANNEL: u8 = 1;

/// Highest valid reader channel number.
pub const MAX_READER_CHANNEL: u8 = 8;

/// Bits per credential frame (standard 26-bit Wiegand).
pub const DEFAULT_FRAME_WIDTH: u8 = 26;

/// Leading parity bit stripped before the card id.
pub const DEFAULT_LEADING_GUARD_BITS: u8 = 1;

/// Trailing parity bit stripped after the card id.
pub const DEFAULT_TRAILING_GUARD_BITS: u8 = 1;

/// Largest supported frame width; frames accumulate in a `u64`.
pub const MAX_FRAME_WIDTH: u8 = 64;

/// Inter-bit gap after which a partial frame is discarded.
pub const DEFAULT_DECODER_TIMEOUT_MS: u64 = 25;

// ============================================================================
// Decisions
// ============================================================================

/// Minimum interval between two accepted scans of the same card.
pub const DEFAULT_DEBOUNCE_SECS: u64 = 60;

/// Name recorded for scans of a blocked card.
pub const BLOCKED_NAME: &str = "Blocked User";

/// Name recorded when no registry entry resolves the card.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Capacity of the recent-transactions ring.
pub const RECENT_TRANSACTIONS_CAPACITY: usize = 10;

/// How long the relay output is held low for a granted scan.
pub const DEFAULT_RELAY_PULSE_MS: u64 = 1000;

// ============================================================================
// Sync and capture
// ============================================================================

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SYNC_BATCH_SIZE: usize = 10;
pub const DEFAULT_SYNC_BATCH_PAUSE_MS: u64 = 1000;

/// Unsent evidence files re-enqueued per sync tick.
pub const DEFAULT_PENDING_UPLOAD_LIMIT: usize = 50;

pub const DEFAULT_CAPTURE_WORKERS: usize = 2;
pub const DEFAULT_CAPTURE_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_CAPTURE_RETRY_DELAY_SECS: u64 = 5;

/// Evidence files larger than this are never uploaded.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

// ============================================================================
// Storage
// ============================================================================

pub const DEFAULT_EVICTION_INTERVAL_SECS: u64 = 300;

/// Evidence ceiling as a fraction of current free disk space.
pub const DEFAULT_CEILING_RATIO: f64 = 0.6;

/// Bytes to free per eviction pass as a fraction of the ceiling.
pub const DEFAULT_CLEANUP_RATIO: f64 = 0.3;

/// Ceiling used when free space cannot be probed (1 GiB).
pub const FALLBACK_CEILING_BYTES: u64 = 1024 * 1024 * 1024;

/// Cleanup target used when free space cannot be probed (300 MiB).
pub const FALLBACK_CLEANUP_BYTES: u64 = 300 * 1024 * 1024;

/// Rolling window of daily statistics.
pub const DEFAULT_STATS_RETENTION_DAYS: u32 = 20;

/// Age beyond which an administrative purge deletes evidence.
pub const DEFAULT_PURGE_DAYS: u32 = 30;

pub const CREDENTIALS_FILE: &str = "users.json";
pub const BLOCK_LIST_FILE: &str = "blocked_users.json";
pub const TRANSACTION_CACHE_FILE: &str = "transactions_cache.json";
pub const DAILY_STATS_FILE: &str = "daily_stats.json";

/// Sidecar suffix proving an evidence file was uploaded.
pub const UPLOAD_MARKER_SUFFIX: &str = ".uploaded.json";

/// Extension of captured evidence stills.
pub const EVIDENCE_EXTENSION: &str = "jpg";
