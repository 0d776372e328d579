//! Restart policy for long-lived workers.
//!
//! A worker runs as its own task so a panic is contained to it. When it
//! fails, panics, or returns while the gateway is still running, it is
//! restarted after a backoff delay; the rest of the gateway is unaffected.
//! Queue consumers take their receiver through a [`SharedReceiver`] so a
//! restarted worker picks up the same queue.

use gatehouse_core::Result;
use gatehouse_network::Backoff;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Receiver that outlives any one run of its consumer.
pub type SharedReceiver<T> = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<T>>>;

pub fn shared<T>(rx: mpsc::UnboundedReceiver<T>) -> SharedReceiver<T> {
    Arc::new(tokio::sync::Mutex::new(rx))
}

/// A run at least this long resets the backoff.
const STABLE_RUN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub backoff: Backoff,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(60),
            },
        }
    }
}

/// Run `make()` until `cancel` fires, restarting it on failure.
///
/// Returns the number of restarts.
pub async fn supervise<F, Fut>(
    name: &'static str,
    policy: RestartPolicy,
    cancel: CancellationToken,
    mut make: F,
) -> u32
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut restarts = 0;
    let mut failures = 0;

    loop {
        let started = Instant::now();
        let result = tokio::spawn(make()).await;

        if cancel.is_cancelled() {
            if let Ok(Err(e)) = &result {
                warn!(worker = name, error = %e, "Worker failed during shutdown");
            }
            break;
        }

        match result {
            Ok(Ok(())) => warn!(worker = name, "Worker exited early"),
            Ok(Err(e)) => error!(worker = name, error = %e, "Worker failed"),
            Err(e) if e.is_panic() => error!(worker = name, "Worker panicked"),
            Err(e) => error!(worker = name, error = %e, "Worker task aborted"),
        }

        if started.elapsed() >= STABLE_RUN {
            failures = 0;
        }
        let delay = policy.backoff.delay(failures);
        failures += 1;
        restarts += 1;

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
        info!(worker = name, restarts, "Restarting worker");
    }
    restarts
}
