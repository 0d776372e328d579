//! Remote collaborators for the gatehouse gateway.
//!
//! This crate defines what the gateway needs from the outside world and how
//! it copes when that world is unreachable.
//!
//! # Components
//!
//! - **CloudStore / ChangeFeed**: audit-record appends, the remote control
//!   document and the credential change feed, dispatched through
//!   [`AnyCloudStore`]
//! - **CloudClient**: a cloud store with transient failures retried
//! - **EvidenceUploader**: uploads evidence stills, dispatched through
//!   [`AnyEvidenceUploader`]
//! - **ConnectivityProbe**: multi-endpoint reachability check
//! - **RetryPolicy**: bounded retries with fixed or exponential backoff
//!
//! Vendor clients are out of scope; `Disabled` variants let a gateway with
//! no cloud configuration run fully offline.
//!
//! # Example
//!
//! ```
//! use gatehouse_network::{AnyCloudStore, CloudClient, RetryPolicy};
//! use gatehouse_network::mock::MockCloudStore;
//!
//! let (store, handle) = MockCloudStore::new();
//! let client = CloudClient::new(AnyCloudStore::Mock(store), RetryPolicy::default());
//! assert!(client.is_enabled());
//! assert_eq!(handle.stored_count(), 0);
//! ```

pub mod cloud;
pub mod connectivity;
pub mod error;
pub mod mock;
pub mod retry;
pub mod uploader;

pub use cloud::{
    AnyCloudStore, ChangeBatch, ChangeFeed, CloudClient, CloudStore, ControlDocument,
    CredentialChange, RelayAction, RelayCommand,
};
pub use connectivity::{ConnectivityProbe, ProbeConfig};
pub use error::{CloudError, Result};
pub use retry::{Backoff, RetryPolicy};
pub use uploader::{AnyEvidenceUploader, EvidenceUploader, check_uploadable};
