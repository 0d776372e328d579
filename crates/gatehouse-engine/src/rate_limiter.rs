//! Per-card scan debounce.
//!
//! A repeat scan of the same card within the interval is rejected, whatever
//! reader it arrives on. Only accepted scans move the card's clock, so
//! holding a card against the reader cannot extend its own lockout.

use gatehouse_core::CardId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct ScanRateLimiter {
    interval_ms: AtomicU64,
    last_accepted: Mutex<HashMap<CardId, Instant>>,
}

impl ScanRateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: AtomicU64::new(duration_ms(interval)),
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    /// Change the interval; applies from the next scan.
    pub fn set_interval(&self, interval: Duration) {
        self.interval_ms.store(duration_ms(interval), Ordering::Relaxed);
    }

    /// Whether a scan of `card` now should be processed. Records the scan
    /// if so.
    pub fn should_process(&self, card: CardId) -> bool {
        self.should_process_at(card, Instant::now())
    }

    pub fn should_process_at(&self, card: CardId, now: Instant) -> bool {
        let interval = self.interval();
        let mut last = self.last_accepted.lock();
        if let Some(previous) = last.get(&card) {
            if now.saturating_duration_since(*previous) < interval {
                return false;
            }
        }
        last.insert(card, now);
        true
    }

    /// Forget cards whose window has passed. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let interval = self.interval();
        let now = Instant::now();
        let mut last = self.last_accepted.lock();
        let before = last.len();
        last.retain(|_, at| now.saturating_duration_since(*at) < interval);
        before - last.len()
    }

    pub fn tracked(&self) -> usize {
        self.last_accepted.lock().len()
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
