//! Remote cloud store and credential change feed.
//!
//! The gateway only needs a small surface from its remote store: append an
//! audit record, read a control document, and follow credential changes.
//! Appends are keyed by [`Transaction::id`] so re-sending a record after an
//! ambiguous timeout overwrites it instead of duplicating it.
//!
//! Collaborators use native `async fn` in traits and are dispatched through
//! [`AnyCloudStore`], mirroring how hardware devices are wrapped. A gateway
//! with no cloud credentials runs with [`AnyCloudStore::Disabled`]; every
//! call then fails with [`CloudError::Disabled`] and nothing is retried.

#![allow(async_fn_in_trait)]

use crate::error::{CloudError, Result};
use crate::mock::MockCloudStore;
use crate::retry::RetryPolicy;
use gatehouse_core::{CardId, Credential, ReaderChannel, Transaction};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Relay action requested remotely or by an administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayAction {
    /// Drive low and hold.
    OpenHold,
    /// Drive high and hold.
    CloseHold,
    /// One timed pulse, as for a granted scan.
    NormalRfid,
    /// Reset logical state without touching the output.
    Normal,
}

impl RelayAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenHold => "open_hold",
            Self::CloseHold => "close_hold",
            Self::NormalRfid => "normal_rfid",
            Self::Normal => "normal",
        }
    }
}

impl fmt::Display for RelayAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayAction {
    type Err = gatehouse_core::Error;

    fn from_str(s: &str) -> gatehouse_core::Result<Self> {
        match s.trim() {
            "open_hold" => Ok(Self::OpenHold),
            "close_hold" => Ok(Self::CloseHold),
            "normal_rfid" => Ok(Self::NormalRfid),
            "normal" => Ok(Self::Normal),
            other => Err(gatehouse_core::Error::malformed(format!(
                "Unknown relay action '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayCommand {
    pub channel: ReaderChannel,
    pub action: RelayAction,
}

/// Remote control document polled by the sync loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlDocument {
    #[serde(default)]
    pub relay_command: Option<RelayCommand>,

    /// Set remotely when credentials changed; cleared by
    /// [`CloudStore::acknowledge_credentials_update`].
    #[serde(default)]
    pub credentials_updated: bool,
}

/// One change from the credential feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CredentialChange {
    Upsert { card: CardId, credential: Credential },
    Remove { card: CardId },
    SetBlocked { card: CardId, blocked: bool },
}

impl CredentialChange {
    pub fn card(&self) -> CardId {
        match self {
            Self::Upsert { card, .. } | Self::Remove { card } | Self::SetBlocked { card, .. } => {
                *card
            }
        }
    }
}

/// Changes after a cursor, plus the cursor to resume from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    pub changes: Vec<CredentialChange>,
    pub cursor: u64,
}

/// Remote audit-record and control store.
pub trait CloudStore: Send + Sync {
    /// Append (or overwrite, by id) one transaction.
    async fn append_transaction(&self, transaction: &Transaction) -> Result<()>;

    async fn fetch_control(&self) -> Result<ControlDocument>;

    async fn acknowledge_credentials_update(&self) -> Result<()>;

    fn name(&self) -> &str;
}

/// Pull-based credential change feed. A push-capable backend can satisfy
/// this by buffering notifications between polls.
pub trait ChangeFeed: Send + Sync {
    /// Changes after `cursor`; a cursor of 0 replays from the beginning.
    async fn poll_changes(&self, cursor: u64) -> Result<ChangeBatch>;
}

/// Enum wrapper for cloud store dispatch.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AnyCloudStore {
    /// No cloud credentials configured.
    Disabled,

    /// In-memory store for development, simulation and testing.
    Mock(MockCloudStore),
}

impl AnyCloudStore {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl CloudStore for AnyCloudStore {
    async fn append_transaction(&self, transaction: &Transaction) -> Result<()> {
        match self {
            Self::Disabled => Err(CloudError::disabled("cloud store")),
            Self::Mock(store) => store.append_transaction(transaction).await,
        }
    }

    async fn fetch_control(&self) -> Result<ControlDocument> {
        match self {
            Self::Disabled => Err(CloudError::disabled("cloud store")),
            Self::Mock(store) => store.fetch_control().await,
        }
    }

    async fn acknowledge_credentials_update(&self) -> Result<()> {
        match self {
            Self::Disabled => Err(CloudError::disabled("cloud store")),
            Self::Mock(store) => store.acknowledge_credentials_update().await,
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Disabled => "disabled",
            Self::Mock(store) => store.name(),
        }
    }
}

impl ChangeFeed for AnyCloudStore {
    async fn poll_changes(&self, cursor: u64) -> Result<ChangeBatch> {
        match self {
            Self::Disabled => Err(CloudError::disabled("change feed")),
            Self::Mock(store) => store.poll_changes(cursor).await,
        }
    }
}

fn is_transient(err: &CloudError) -> bool {
    err.is_transient()
}

/// Cloud store with transient failures retried under a policy.
///
/// Callers see an error only once the policy is exhausted or the failure is
/// permanent.
#[derive(Debug, Clone)]
pub struct CloudClient {
    store: AnyCloudStore,
    retry: RetryPolicy,
}

impl CloudClient {
    pub fn new(store: AnyCloudStore, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn disabled() -> Self {
        Self::new(AnyCloudStore::Disabled, RetryPolicy::none())
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_enabled()
    }

    pub fn store(&self) -> &AnyCloudStore {
        &self.store
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    pub async fn append_transaction(&self, transaction: &Transaction) -> Result<()> {
        self.retry
            .run(
                "append_transaction",
                || self.store.append_transaction(transaction),
                is_transient,
            )
            .await?;
        debug!(id = %transaction.id, card = %transaction.card_id, "Transaction stored remotely");
        Ok(())
    }

    pub async fn fetch_control(&self) -> Result<ControlDocument> {
        self.retry
            .run("fetch_control", || self.store.fetch_control(), is_transient)
            .await
    }

    pub async fn acknowledge_credentials_update(&self) -> Result<()> {
        self.retry
            .run(
                "acknowledge_credentials_update",
                || self.store.acknowledge_credentials_update(),
                is_transient,
            )
            .await
    }

    pub async fn poll_changes(&self, cursor: u64) -> Result<ChangeBatch> {
        self.retry
            .run("poll_changes", || self.store.poll_changes(cursor), is_transient)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::AccessOutcome;
    use rstest::rstest;
    use std::time::Duration;

    fn txn() -> Transaction {
        Transaction::new(
            CardId::new(111111),
            "Alice",
            AccessOutcome::Granted,
            ReaderChannel::new(1).unwrap(),
        )
    }

    #[rstest]
    #[case("open_hold", RelayAction::OpenHold)]
    #[case("close_hold", RelayAction::CloseHold)]
    #[case("normal_rfid", RelayAction::NormalRfid)]
    #[case(" normal ", RelayAction::Normal)]
    fn test_relay_action_from_str(#[case] input: &str, #[case] expected: RelayAction) {
        assert_eq!(input.parse::<RelayAction>().unwrap(), expected);
    }

    #[test]
    fn test_relay_action_rejects_unknown() {
        assert!("explode".parse::<RelayAction>().is_err());
    }

    #[test]
    fn test_control_document_wire_format() {
        let doc: ControlDocument = serde_json::from_str(
            r#"{"relay_command": {"channel": 2, "action": "open_hold"}, "credentials_updated": true}"#,
        )
        .unwrap();
        assert_eq!(
            doc.relay_command,
            Some(RelayCommand {
                channel: ReaderChannel::new(2).unwrap(),
                action: RelayAction::OpenHold,
            })
        );
        assert!(doc.credentials_updated);

        let empty: ControlDocument = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, ControlDocument::default());
    }

    #[tokio::test]
    async fn test_disabled_store_fails_without_retry() {
        let client = CloudClient::disabled();
        assert!(!client.is_enabled());
        assert!(matches!(
            client.append_transaction(&txn()).await,
            Err(CloudError::Disabled { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_retries_transient_timeout() {
        let (store, handle) = MockCloudStore::new();
        handle.fail_next(2);
        let client = CloudClient::new(
            AnyCloudStore::Mock(store),
            RetryPolicy::fixed(3, Duration::from_secs(1)),
        );

        client.append_transaction(&txn()).await.unwrap();
        assert_eq!(handle.stored_count(), 1);
        assert_eq!(handle.append_calls(), 3);
    }
}
