//! In-memory remote collaborators for development, simulation and testing.
//!
//! Each mock is created together with a handle that shares its state, so a
//! test can inject failures and inspect what reached the "remote" side while
//! the gateway owns the mock itself.

use crate::cloud::{ChangeBatch, ChangeFeed, CloudStore, ControlDocument, CredentialChange};
use crate::error::{CloudError, Result};
use crate::uploader::EvidenceUploader;
use gatehouse_core::{CardId, Transaction};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

const MOCK_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Default)]
struct CloudState {
    records: HashMap<Uuid, Transaction>,
    order: Vec<Uuid>,
    append_calls: u32,
    duplicate_writes: u32,

    fail_all: bool,
    fail_next: u32,
    fail_cards: HashSet<CardId>,
    timeout_after_write: u32,

    control: ControlDocument,
    acknowledgements: u32,
    changes: Vec<CredentialChange>,
}

/// Mock cloud store and change feed.
#[derive(Debug, Clone)]
pub struct MockCloudStore {
    name: Arc<str>,
    state: Arc<Mutex<CloudState>>,
}

/// Control side of a [`MockCloudStore`].
#[derive(Debug, Clone)]
pub struct MockCloudHandle {
    state: Arc<Mutex<CloudState>>,
}

impl MockCloudStore {
    pub fn new() -> (Self, MockCloudHandle) {
        Self::with_name("mock cloud")
    }

    pub fn with_name(name: &str) -> (Self, MockCloudHandle) {
        let state = Arc::new(Mutex::new(CloudState::default()));
        (
            Self {
                name: Arc::from(name),
                state: state.clone(),
            },
            MockCloudHandle { state },
        )
    }

    fn check_available(state: &mut CloudState) -> Result<()> {
        if state.fail_all {
            return Err(CloudError::unavailable("mock cloud offline"));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(CloudError::Timeout(MOCK_TIMEOUT_MS));
        }
        Ok(())
    }
}

impl CloudStore for MockCloudStore {
    async fn append_transaction(&self, transaction: &Transaction) -> Result<()> {
        let mut state = self.state.lock();
        state.append_calls += 1;
        Self::check_available(&mut state)?;
        if state.fail_cards.contains(&transaction.card_id) {
            return Err(CloudError::unavailable(format!(
                "mock write failed for card {}",
                transaction.card_id
            )));
        }

        if state
            .records
            .insert(transaction.id, transaction.clone())
            .is_some()
        {
            state.duplicate_writes += 1;
        } else {
            state.order.push(transaction.id);
        }

        if state.timeout_after_write > 0 {
            state.timeout_after_write -= 1;
            return Err(CloudError::Timeout(MOCK_TIMEOUT_MS));
        }
        Ok(())
    }

    async fn fetch_control(&self) -> Result<ControlDocument> {
        let mut state = self.state.lock();
        Self::check_available(&mut state)?;
        Ok(state.control.clone())
    }

    async fn acknowledge_credentials_update(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_available(&mut state)?;
        state.control.credentials_updated = false;
        state.acknowledgements += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl ChangeFeed for MockCloudStore {
    async fn poll_changes(&self, cursor: u64) -> Result<ChangeBatch> {
        let mut state = self.state.lock();
        Self::check_available(&mut state)?;
        let start = usize::try_from(cursor)
            .unwrap_or(usize::MAX)
            .min(state.changes.len());
        Ok(ChangeBatch {
            changes: state.changes[start..].to_vec(),
            cursor: state.changes.len() as u64,
        })
    }
}

impl MockCloudHandle {
    /// Fail every call with `Unavailable` until cleared.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().fail_all = offline;
    }

    /// Fail the next `n` calls with a timeout.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    /// Fail every append for this card.
    pub fn fail_card(&self, card: CardId) {
        self.state.lock().fail_cards.insert(card);
    }

    /// Store the next `n` appends but report a timeout, as when the
    /// response is lost after the write landed.
    pub fn timeout_after_write(&self, n: u32) {
        self.state.lock().timeout_after_write = n;
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_all = false;
        state.fail_next = 0;
        state.fail_cards.clear();
        state.timeout_after_write = 0;
    }

    /// Stored transactions in first-write order.
    pub fn stored(&self) -> Vec<Transaction> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect()
    }

    pub fn stored_count(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn append_calls(&self) -> u32 {
        self.state.lock().append_calls
    }

    /// Appends that overwrote an already-stored id.
    pub fn duplicate_writes(&self) -> u32 {
        self.state.lock().duplicate_writes
    }

    pub fn set_control(&self, control: ControlDocument) {
        self.state.lock().control = control;
    }

    pub fn control(&self) -> ControlDocument {
        self.state.lock().control.clone()
    }

    pub fn acknowledgements(&self) -> u32 {
        self.state.lock().acknowledgements
    }

    pub fn push_change(&self, change: CredentialChange) {
        self.state.lock().changes.push(change);
    }
}

#[derive(Debug, Default)]
struct UploaderState {
    uploads: Vec<PathBuf>,
    attempts: u32,
    fail_all: bool,
    fail_next: u32,
}

/// Mock evidence uploader returning `mock://evidence/<file name>`.
#[derive(Debug, Clone)]
pub struct MockUploader {
    state: Arc<Mutex<UploaderState>>,
}

#[derive(Debug, Clone)]
pub struct MockUploaderHandle {
    state: Arc<Mutex<UploaderState>>,
}

impl MockUploader {
    pub fn new() -> (Self, MockUploaderHandle) {
        let state = Arc::new(Mutex::new(UploaderState::default()));
        (
            Self {
                state: state.clone(),
            },
            MockUploaderHandle { state },
        )
    }
}

impl EvidenceUploader for MockUploader {
    async fn upload(&self, path: &Path) -> Result<String> {
        let mut state = self.state.lock();
        state.attempts += 1;
        if state.fail_all {
            return Err(CloudError::unavailable("mock uploader offline"));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(CloudError::Timeout(MOCK_TIMEOUT_MS));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        state.uploads.push(path.to_path_buf());
        Ok(format!("mock://evidence/{name}"))
    }
}

impl MockUploaderHandle {
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().fail_all = offline;
    }

    pub fn fail_next(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    pub fn uploads(&self) -> Vec<PathBuf> {
        self.state.lock().uploads.clone()
    }

    pub fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }
}
