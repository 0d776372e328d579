//! Timer-driven housekeeping: evidence eviction, statistics persistence and
//! debounce-table pruning.

use crate::rate_limiter::ScanRateLimiter;
use chrono::{Local, NaiveDate};
use gatehouse_core::Result;
use gatehouse_storage::{DailyStats, EvictionMonitor, EvictionReport};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Run an eviction pass every `interval` until cancelled. A pass in
/// progress is never interrupted.
pub async fn run_eviction(
    monitor: Arc<EvictionMonitor>,
    interval: Duration,
    last_report: Arc<Mutex<Option<EvictionReport>>>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = interval.as_secs(), "Eviction monitor started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match monitor.run_pass().await {
                    Ok(report) => *last_report.lock() = Some(report),
                    Err(e) => warn!(error = %e, "Eviction pass failed"),
                }
            }
        }
    }
    info!("Eviction monitor stopped");
    Ok(())
}

/// Flushes dirty statistics on every tick and prunes them once per day.
#[derive(Debug)]
pub struct StatsKeeper {
    stats: Arc<DailyStats>,
    limiter: Arc<ScanRateLimiter>,
    last_prune: Mutex<Option<NaiveDate>>,
}

impl StatsKeeper {
    pub fn new(stats: Arc<DailyStats>, limiter: Arc<ScanRateLimiter>) -> Self {
        Self {
            stats,
            limiter,
            last_prune: Mutex::new(None),
        }
    }

    /// One housekeeping round for `today`.
    pub async fn tick(&self, today: NaiveDate) -> Result<()> {
        let due = *self.last_prune.lock() != Some(today);
        if due {
            let removed = self.stats.prune(today);
            *self.last_prune.lock() = Some(today);
            if removed > 0 {
                info!(removed, "Old daily stats pruned");
            }
        }

        if self.stats.flush().await? {
            debug!("Daily stats flushed");
        }

        let forgotten = self.limiter.prune();
        if forgotten > 0 {
            debug!(forgotten, "Debounce entries expired");
        }
        Ok(())
    }

    /// Tick every `interval` until cancelled, flushing once more on the way
    /// out.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Local::now().date_naive()).await {
                        warn!(error = %e, "Stats housekeeping failed");
                    }
                }
            }
        }

        if let Err(e) = self.stats.flush().await {
            warn!(error = %e, "Final stats flush failed");
        }
        Ok(())
    }
}
