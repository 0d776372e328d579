//! Administrative service.
//!
//! Transport-agnostic: each operation takes plain arguments and returns an
//! [`AdminResponse`], which serialises as
//! `{"status": "success" | "error", "message": ..., "data": ...}`. Failures
//! never propagate past the call; they become an error response and a log
//! line.

use crate::gateway::Components;
use crate::status::GatewayStatus;
use chrono::{Local, Utc};
use gatehouse_core::constants::DEFAULT_PURGE_DAYS;
use gatehouse_core::{CardId, Credential, DayCounter, ReaderChannel};
use gatehouse_network::RelayAction;
use gatehouse_storage::DiskSpace;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Stills listed by [`AdminService::list_evidence`].
const EVIDENCE_LIST_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Result of one administrative call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminResponse {
    pub status: ResponseStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl AdminResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: message.into(),
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
            data: None,
        }
    }

    /// Success carrying `data`. Falls back to an error response if `data`
    /// does not serialise.
    pub fn with_data(message: impl Into<String>, data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                data: Some(value),
                ..Self::success(message)
            },
            Err(e) => failed("serialising response", e),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

fn failed(action: &str, error: impl fmt::Display) -> AdminResponse {
    error!(action, %error, "Administrative operation failed");
    AdminResponse::error(format!("Error {action}: {error}"))
}

/// One allow-list entry as listed to an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub card_number: String,
    pub id: String,
    pub ref_id: String,
    pub name: String,
    pub blocked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceEntry {
    pub file_name: String,
    pub card: Option<String>,
    pub reader_channel: Option<ReaderChannel>,
    pub captured_at: Option<i64>,
    pub size: u64,
    pub uploaded: bool,
}

/// Newest stills first, with counts over the whole directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceListing {
    pub total: usize,
    pub uploaded: usize,
    pub pending: usize,
    pub files: Vec<EvidenceEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageInfo {
    pub evidence_files: usize,
    pub evidence_bytes: u64,
    /// Combined size of the JSON stores.
    pub system_files_bytes: u64,
    pub disk: Option<DiskSpace>,
    pub daily_stats: Vec<DayCounter>,
}

/// Handle for administrative operations on a running gateway; cheap to
/// clone.
#[derive(Clone)]
pub struct AdminService {
    components: Arc<Components>,
}

impl AdminService {
    pub(crate) fn new(components: Arc<Components>) -> Self {
        Self { components }
    }

    /// Add or replace an allow-list entry.
    pub async fn add_credential(
        &self,
        card_number: &str,
        external_id: &str,
        name: &str,
        ref_id: Option<&str>,
    ) -> AdminResponse {
        let (external_id, name) = (external_id.trim(), name.trim());
        if card_number.trim().is_empty() || external_id.is_empty() || name.is_empty() {
            return AdminResponse::error("Missing card_number, id or name");
        }
        let card = match parse_card(card_number) {
            Ok(card) => card,
            Err(response) => return response,
        };

        let mut credential = Credential::new(card, external_id, name);
        if let Some(ref_id) = ref_id {
            credential = credential.with_ref_id(ref_id.trim());
        }
        match self.components.registry.upsert_credential(card, credential).await {
            Ok(()) => {
                info!(card = %card, name, "Credential saved");
                AdminResponse::success(format!("Credential {card} saved"))
            }
            Err(e) => failed("saving credential", e),
        }
    }

    pub async fn delete_credential(&self, card_number: &str) -> AdminResponse {
        let card = match parse_card(card_number) {
            Ok(card) => card,
            Err(response) => return response,
        };
        match self.components.registry.remove_credential(card).await {
            Ok(true) => {
                info!(card = %card, "Credential deleted");
                AdminResponse::success(format!("Credential {card} deleted"))
            }
            Ok(false) => AdminResponse::error("Credential not found"),
            Err(e) => failed("deleting credential", e),
        }
    }

    /// Entries whose external id equals `external_id`.
    pub fn search_credentials(&self, external_id: &str) -> AdminResponse {
        let external_id = external_id.trim();
        let found: Vec<_> = self
            .entries()
            .into_iter()
            .filter(|entry| entry.id == external_id)
            .collect();
        if found.is_empty() {
            return AdminResponse::error("Credential not found");
        }
        AdminResponse::with_data(format!("{} credential(s) found", found.len()), found)
    }

    /// Every entry, sorted by name without regard to case.
    pub fn list_credentials(&self) -> AdminResponse {
        let entries = self.entries();
        AdminResponse::with_data(format!("{} credential(s)", entries.len()), entries)
    }

    fn entries(&self) -> Vec<CredentialEntry> {
        let blocked = self.components.registry.block_list();
        let mut entries: Vec<_> = self
            .components
            .registry
            .credentials()
            .entries()
            .iter()
            .map(|(key, credential)| CredentialEntry {
                card_number: key.clone(),
                id: credential.external_id.clone(),
                ref_id: credential.ref_id.clone(),
                name: credential.display_name.clone(),
                blocked: key.parse::<CardId>().is_ok_and(|card| blocked.contains(card)),
            })
            .collect();
        entries.sort_by_key(|entry| entry.name.to_lowercase());
        entries
    }

    pub async fn block(&self, card_number: &str) -> AdminResponse {
        let card = match parse_card(card_number) {
            Ok(card) => card,
            Err(response) => return response,
        };
        match self.components.registry.set_blocked(card, true).await {
            Ok(_) => {
                info!(card = %card, "Card blocked");
                AdminResponse::success(format!("Card {card} blocked"))
            }
            Err(e) => failed("blocking card", e),
        }
    }

    pub async fn unblock(&self, card_number: &str) -> AdminResponse {
        let card = match parse_card(card_number) {
            Ok(card) => card,
            Err(response) => return response,
        };
        match self.components.registry.set_blocked(card, false).await {
            Ok(true) => {
                info!(card = %card, "Card unblocked");
                AdminResponse::success(format!("Card {card} unblocked"))
            }
            Ok(false) => AdminResponse::error(format!("Card {card} is not blocked")),
            Err(e) => failed("unblocking card", e),
        }
    }

    /// Run a sync tick now instead of waiting for the timer.
    pub async fn sync_now(&self) -> AdminResponse {
        let report = self.components.sync.tick().await;
        let message = if report.online {
            format!("Sync complete, {} transaction(s) synced", report.sync.synced)
        } else {
            "Offline, sync skipped".to_string()
        };
        AdminResponse::with_data(message, report)
    }

    pub async fn relay_command(&self, channel: u8, action: &str) -> AdminResponse {
        let channel = match ReaderChannel::new(channel) {
            Ok(channel) => channel,
            Err(e) => return AdminResponse::error(e.to_string()),
        };
        let action: RelayAction = match action.parse() {
            Ok(action) => action,
            Err(e) => return AdminResponse::error(e.to_string()),
        };
        let Some(relay) = self.components.relays.get(&channel) else {
            return AdminResponse::error(format!("No relay on channel {channel}"));
        };

        match relay.apply(action).await {
            Ok(state) => {
                info!(%channel, %action, %state, "Relay command applied");
                AdminResponse::with_data(
                    format!("Relay {channel} set to {action}"),
                    relay.status(),
                )
            }
            Err(e) => failed("applying relay command", e),
        }
    }

    /// The most recent decisions, newest first.
    pub fn recent_transactions(&self) -> AdminResponse {
        let recent = self.components.recent.snapshot();
        AdminResponse::with_data(format!("{} transaction(s)", recent.len()), recent)
    }

    /// Counters for the retention window, oldest first.
    pub fn daily_stats(&self) -> AdminResponse {
        let days = self.components.stats.last_days(Local::now().date_naive());
        AdminResponse::with_data(format!("{} day(s)", days.len()), days)
    }

    pub async fn storage_info(&self) -> AdminResponse {
        let files = match self.components.evidence.list().await {
            Ok(files) => files,
            Err(e) => return failed("reading storage info", e),
        };

        let pipeline = &self.components.pipeline;
        let mut system_files_bytes = pipeline.cache().file_size().await;
        for path in [
            self.components.registry.credentials_path(),
            self.components.registry.block_list_path(),
            self.components.stats.path(),
        ] {
            if let Ok(meta) = tokio::fs::metadata(path).await {
                system_files_bytes += meta.len();
            }
        }

        let info = StorageInfo {
            evidence_files: files.len(),
            evidence_bytes: files.iter().map(|f| f.size).sum(),
            system_files_bytes,
            disk: self.components.eviction.disk_space().await,
            daily_stats: self.components.stats.last_days(Local::now().date_naive()),
        };
        AdminResponse::with_data("Storage info", info)
    }

    /// The newest stills and their upload status.
    pub async fn list_evidence(&self) -> AdminResponse {
        let mut files = match self.components.evidence.list().await {
            Ok(files) => files,
            Err(e) => return failed("listing evidence", e),
        };
        files.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()).then_with(|| b.path.cmp(&a.path)));

        let uploaded = files.iter().filter(|f| f.uploaded).count();
        let listing = EvidenceListing {
            total: files.len(),
            uploaded,
            pending: files.len() - uploaded,
            files: files
                .into_iter()
                .take(EVIDENCE_LIST_LIMIT)
                .map(|f| EvidenceEntry {
                    file_name: f.file_name(),
                    card: f.card,
                    reader_channel: f.reader_channel,
                    captured_at: f.captured_at,
                    size: f.size,
                    uploaded: f.uploaded,
                })
                .collect(),
        };
        AdminResponse::with_data(format!("{} still(s)", listing.total), listing)
    }

    /// Delete one still (and its marker) by file name.
    pub async fn delete_evidence(&self, file_name: &str) -> AdminResponse {
        let lower = file_name.to_ascii_lowercase();
        if file_name.is_empty()
            || file_name.contains("..")
            || file_name.contains('/')
            || file_name.contains('\\')
            || !(lower.ends_with(".jpg") || lower.ends_with(".jpeg"))
        {
            return AdminResponse::error("Invalid filename");
        }

        let path = self.components.evidence.dir().join(file_name);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return AdminResponse::error("File not found");
        }
        match self.components.evidence.delete(&path).await {
            Ok(freed) => {
                info!(file = file_name, freed, "Evidence deleted");
                AdminResponse::success(format!("{file_name} deleted"))
            }
            Err(e) => failed("deleting evidence", e),
        }
    }

    /// Delete stills older than `days_to_keep` days (30 when unset).
    pub async fn purge_evidence(&self, days_to_keep: Option<u32>) -> AdminResponse {
        let days = days_to_keep.unwrap_or(DEFAULT_PURGE_DAYS);
        match self
            .components
            .evidence
            .purge_older_than(days, Utc::now().timestamp())
            .await
        {
            Ok(report) => AdminResponse::with_data(
                format!("Cleaned up {} old still(s)", report.deleted),
                report,
            ),
            Err(e) => failed("purging evidence", e),
        }
    }

    /// Drop counters outside the retention window.
    pub async fn cleanup_stats(&self) -> AdminResponse {
        match self.components.stats.cleanup_old().await {
            Ok(removed) => AdminResponse::with_data(
                format!("Cleaned up {removed} old day(s)"),
                serde_json::json!({ "deleted_count": removed }),
            ),
            Err(e) => failed("cleaning up stats", e),
        }
    }

    pub async fn clear_stats(&self) -> AdminResponse {
        match self.components.stats.reset().await {
            Ok(()) => {
                info!("Daily stats cleared");
                AdminResponse::success("All statistics cleared")
            }
            Err(e) => failed("clearing stats", e),
        }
    }

    /// Change the debounce interval. Takes effect on the next scan.
    pub fn update_debounce(&self, seconds: u64) -> AdminResponse {
        if seconds == 0 {
            return AdminResponse::error("Debounce interval must be at least 1 second");
        }
        self.components.limiter.set_interval(Duration::from_secs(seconds));
        info!(seconds, "Debounce interval updated");
        AdminResponse::success(format!("Debounce interval set to {seconds}s"))
    }

    pub async fn status(&self) -> AdminResponse {
        let status: GatewayStatus = self.components.status().await;
        AdminResponse::with_data("Gateway status", status)
    }
}

fn parse_card(card_number: &str) -> Result<CardId, AdminResponse> {
    let card_number = card_number.trim();
    if card_number.is_empty() {
        return Err(AdminResponse::error("Missing card_number"));
    }
    if !card_number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AdminResponse::error("Card number must be numeric"));
    }
    card_number
        .parse()
        .map_err(|_| AdminResponse::error("Card number out of range"))
}
