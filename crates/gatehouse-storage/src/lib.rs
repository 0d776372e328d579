//! Local persistence for the gatehouse gateway.
//!
//! All state lives in plain JSON documents and image files under one base
//! directory, so the gateway keeps working with no network and survives
//! restarts mid-write.
//!
//! # Architecture
//!
//! - [`StoragePaths`] - file layout, directory creation
//! - [`json_store`] - atomic write-then-rename persistence with corrupt-file quarantine
//! - [`CredentialRegistry`] - allow-list and block-list with derived lookup sets
//! - [`TransactionCache`] - transactions awaiting remote confirmation
//! - [`DailyStats`] - rolling per-day outcome counters
//! - [`EvidenceStore`] - captured stills and their upload markers
//! - [`EvictionMonitor`] - disk-pressure eviction of old stills
//!
//! # Core Concepts
//!
//! ## One guard per store
//!
//! Every JSON store has its own async guard; there is no global lock. The
//! evidence directory has none at all: writers publish by rename and
//! destructive operations re-check marker presence on disk.
//!
//! ## Snapshots for lookups
//!
//! The registry's lookup sets are swapped in as a whole after each save, so
//! the decision path can test membership without awaiting anything.
//!
//! # Examples
//!
//! ```no_run
//! use gatehouse_core::{CardId, Credential};
//! use gatehouse_storage::{CredentialRegistry, StoragePaths};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let paths = StoragePaths::new("/var/lib/gatehouse");
//! paths.ensure_dirs().await?;
//!
//! let registry = CredentialRegistry::open(&paths).await?;
//! registry
//!     .upsert_credential(CardId::new(111111), Credential::new(CardId::new(111111), "u-1", "Alice"))
//!     .await?;
//!
//! assert!(registry.is_allowed(CardId::new(111111)));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod eviction;
pub mod evidence;
pub mod json_store;
pub mod registry;
pub mod stats;
pub mod transactions;

pub use error::{StorageError, StorageResult};
pub use eviction::{
    DiskProbe, DiskSpace, EvictionMonitor, EvictionPolicy, EvictionReport, FixedDiskProbe,
    FsDiskProbe, Thresholds,
};
pub use evidence::{DirectoryUsage, EvidenceFile, EvidenceStore, PurgeReport, UploadMarker};
pub use json_store::StoragePaths;
pub use registry::{BlockMap, Classification, CredentialMap, CredentialRegistry, Snapshot};
pub use stats::DailyStats;
pub use transactions::TransactionCache;
