//! Rolling per-day outcome counters.
//!
//! Counting happens in memory on the decision path and never touches disk;
//! a maintenance timer calls [`DailyStats::flush`] to persist dirty counters.

use crate::error::StorageResult;
use crate::json_store::{read_json_or_default, write_json_atomic};
use chrono::{Days, Local, NaiveDate};
use gatehouse_core::constants::DEFAULT_STATS_RETENTION_DAYS;
use gatehouse_core::{AccessOutcome, DayCounter};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Default)]
struct State {
    days: BTreeMap<String, DayCounter>,
    dirty: bool,
}

#[derive(Debug)]
pub struct DailyStats {
    path: PathBuf,
    retention_days: u32,
    state: Mutex<State>,
    write_guard: tokio::sync::Mutex<()>,
}

impl DailyStats {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_retention(path, DEFAULT_STATS_RETENTION_DAYS)
    }

    pub fn with_retention(path: impl Into<PathBuf>, retention_days: u32) -> Self {
        Self {
            path: path.into(),
            retention_days: retention_days.max(1),
            state: Mutex::new(State::default()),
            write_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Create and load from disk.
    pub async fn open(path: impl Into<PathBuf>, retention_days: u32) -> StorageResult<Self> {
        let stats = Self::with_retention(path, retention_days);
        stats.load().await?;
        Ok(stats)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Replace in-memory counters with the persisted ones.
    pub async fn load(&self) -> StorageResult<usize> {
        let days: BTreeMap<String, DayCounter> = read_json_or_default(&self.path).await?;
        let count = days.len();
        *self.state.lock() = State { days, dirty: false };
        debug!(days = count, "Daily stats loaded");
        Ok(count)
    }

    /// Count one outcome against `date`.
    pub fn record(&self, outcome: AccessOutcome, date: NaiveDate) {
        let key = date.format(DATE_FORMAT).to_string();
        let mut state = self.state.lock();
        state
            .days
            .entry(key.clone())
            .or_insert_with(|| DayCounter::zero(key))
            .record(outcome);
        state.dirty = true;
    }

    /// Count one outcome against today's local date.
    pub fn record_now(&self, outcome: AccessOutcome) {
        self.record(outcome, Local::now().date_naive());
    }

    /// Counter for one day, zero if nothing was recorded.
    pub fn day(&self, date: NaiveDate) -> DayCounter {
        let key = date.format(DATE_FORMAT).to_string();
        self.state
            .lock()
            .days
            .get(&key)
            .cloned()
            .unwrap_or_else(|| DayCounter::zero(key))
    }

    /// The retention window ending at `today`, oldest first, with days that
    /// saw no scans reported as zero.
    pub fn last_days(&self, today: NaiveDate) -> Vec<DayCounter> {
        let state = self.state.lock();
        (0..self.retention_days)
            .rev()
            .filter_map(|back| today.checked_sub_days(Days::new(u64::from(back))))
            .map(|date| {
                let key = date.format(DATE_FORMAT).to_string();
                state
                    .days
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| DayCounter::zero(key))
            })
            .collect()
    }

    /// Drop counters older than the retention window ending at `today`, and
    /// keys that are not dates. Returns how many were removed.
    pub fn prune(&self, today: NaiveDate) -> usize {
        let Some(oldest) = today.checked_sub_days(Days::new(u64::from(self.retention_days - 1)))
        else {
            return 0;
        };

        let mut state = self.state.lock();
        let before = state.days.len();
        state.days.retain(|key, _| match NaiveDate::parse_from_str(key, DATE_FORMAT) {
            Ok(date) => date >= oldest,
            Err(_) => {
                warn!(key = %key, "Dropping daily stats entry with unparsable date");
                false
            }
        });
        let removed = before - state.days.len();
        if removed > 0 {
            state.dirty = true;
        }
        removed
    }

    /// Remove every counter.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.days.clear();
        state.dirty = true;
    }

    /// Persist counters if anything changed since the last flush.
    /// Returns whether a write happened.
    pub async fn flush(&self) -> StorageResult<bool> {
        let _guard = self.write_guard.lock().await;
        let days = {
            let mut state = self.state.lock();
            if !state.dirty {
                return Ok(false);
            }
            state.dirty = false;
            state.days.clone()
        };

        if let Err(e) = write_json_atomic(&self.path, &days).await {
            self.state.lock().dirty = true;
            return Err(e);
        }
        Ok(true)
    }

    /// Prune relative to today and persist. Returns how many days were removed.
    pub async fn cleanup_old(&self) -> StorageResult<usize> {
        let removed = self.prune(Local::now().date_naive());
        self.flush().await?;
        if removed > 0 {
            info!(removed, "Old daily stats removed");
        }
        Ok(removed)
    }

    /// Clear and persist.
    pub async fn reset(&self) -> StorageResult<()> {
        self.clear();
        self.flush().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[rstest]
    #[case(AccessOutcome::Granted, 1, 0, 0)]
    #[case(AccessOutcome::Denied, 0, 1, 0)]
    #[case(AccessOutcome::Blocked, 0, 0, 1)]
    fn test_record_counts_by_outcome(
        #[case] outcome: AccessOutcome,
        #[case] valid: u64,
        #[case] invalid: u64,
        #[case] blocked: u64,
    ) {
        let stats = DailyStats::new("unused.json");
        let today = date("2024-03-10");
        stats.record(outcome, today);

        let counter = stats.day(today);
        assert_eq!(counter.date, "2024-03-10");
        assert_eq!(counter.valid_entries, valid);
        assert_eq!(counter.invalid_entries, invalid);
        assert_eq!(counter.blocked_entries, blocked);
    }

    #[test]
    fn test_last_days_zero_filled_oldest_first() {
        let stats = DailyStats::with_retention("unused.json", 3);
        stats.record(AccessOutcome::Granted, date("2024-03-08"));
        stats.record(AccessOutcome::Granted, date("2024-03-10"));
        stats.record(AccessOutcome::Granted, date("2024-03-10"));

        let days = stats.last_days(date("2024-03-10"));
        let dates: Vec<_> = days.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, vec!["2024-03-08", "2024-03-09", "2024-03-10"]);
        assert_eq!(days[0].valid_entries, 1);
        assert_eq!(days[1].total(), 0);
        assert_eq!(days[2].valid_entries, 2);
    }

    #[test]
    fn test_default_window_is_twenty_days() {
        let stats = DailyStats::new("unused.json");
        assert_eq!(stats.last_days(date("2024-03-10")).len(), 20);
    }

    #[test]
    fn test_prune_drops_days_outside_window() {
        let stats = DailyStats::with_retention("unused.json", 20);
        stats.record(AccessOutcome::Denied, date("2024-02-19"));
        stats.record(AccessOutcome::Denied, date("2024-02-20"));
        stats.record(AccessOutcome::Denied, date("2024-03-10"));

        assert_eq!(stats.prune(date("2024-03-10")), 1);
        assert_eq!(stats.day(date("2024-02-19")).total(), 0);
        assert_eq!(stats.day(date("2024-02-20")).total(), 1);
    }

    #[tokio::test]
    async fn test_flush_only_when_dirty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daily_stats.json");
        let stats = DailyStats::new(&path);

        assert!(!stats.flush().await.unwrap());
        stats.record(AccessOutcome::Blocked, date("2024-03-10"));
        assert!(stats.flush().await.unwrap());
        assert!(!stats.flush().await.unwrap());

        let reopened = DailyStats::open(&path, 20).await.unwrap();
        assert_eq!(reopened.day(date("2024-03-10")).blocked_entries, 1);
    }

    #[tokio::test]
    async fn test_persisted_layout_keyed_by_date() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daily_stats.json");
        let stats = DailyStats::new(&path);
        stats.record(AccessOutcome::Granted, date("2024-03-10"));
        stats.flush().await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(raw["2024-03-10"]["valid_entries"], 1);
        assert_eq!(raw["2024-03-10"]["date"], "2024-03-10");
    }

    #[tokio::test]
    async fn test_reset_clears_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daily_stats.json");
        let stats = DailyStats::new(&path);
        stats.record(AccessOutcome::Granted, date("2024-03-10"));
        stats.flush().await.unwrap();

        stats.reset().await.unwrap();
        assert_eq!(DailyStats::open(&path, 20).await.unwrap().load().await.unwrap(), 0);
    }
}
