//! Relay actuator.
//!
//! Each reader channel drives one gate relay through a three-state machine:
//!
//! - `Normal`: granted scans pulse the relay (low for the pulse time, then high)
//! - `OpenHold`: output held low; scans do not pulse
//! - `CloseHold`: output held high; scans do not pulse
//!
//! # Transitions
//!
//! | action        | output                | next state  |
//! |---------------|-----------------------|-------------|
//! | `normal_rfid` | low, wait, high       | `Normal`    |
//! | `open_hold`   | low                   | `OpenHold`  |
//! | `close_hold`  | high                  | `CloseHold` |
//! | `normal`      | untouched             | `Normal`    |
//!
//! A failed output write leaves the logical state unchanged. Pulses never
//! run on the caller's task: [`RelayActuator::trigger_pulse`] spawns them,
//! and a pulse requested while one is running is dropped.
//!
//! # Examples
//!
//! ```
//! use gatehouse_core::{ReaderChannel, RelayState};
//! use gatehouse_engine::relay::RelayActuator;
//! use gatehouse_hardware::AnyRelayOutput;
//! use gatehouse_hardware::mock::MockRelay;
//! use gatehouse_network::RelayAction;
//! use std::time::Duration;
//!
//! # async fn example() -> gatehouse_core::Result<()> {
//! let relay = MockRelay::new("relay 1", 25);
//! let actuator = RelayActuator::new(
//!     ReaderChannel::new(1)?,
//!     AnyRelayOutput::Mock(relay.clone()),
//!     Duration::from_millis(10),
//! );
//!
//! actuator.apply(RelayAction::OpenHold).await?;
//! assert_eq!(actuator.state(), RelayState::OpenHold);
//! # Ok(())
//! # }
//! ```

use gatehouse_core::{Error, ReaderChannel, RelayState, Result};
use gatehouse_hardware::{AnyRelayOutput, PinLevel, RelayOutput};
use gatehouse_network::RelayAction;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Transitions kept per actuator for status and debugging.
const MAX_HISTORY_SIZE: usize = 100;

/// One applied action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTransition {
    pub from: RelayState,
    pub to: RelayState,
    pub action: RelayAction,
    pub at: Instant,
}

/// Snapshot for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    pub channel: ReaderChannel,
    pub state: RelayState,
    pub enabled: bool,
    pub pulsing: bool,
}

#[derive(Debug)]
struct Inner {
    state: RelayState,
    history: VecDeque<RelayTransition>,
}

#[derive(Debug)]
pub struct RelayActuator {
    channel: ReaderChannel,
    output: AnyRelayOutput,
    pulse_duration: Duration,
    inner: Mutex<Inner>,
    pulsing: AtomicBool,
}

impl RelayActuator {
    pub fn new(channel: ReaderChannel, output: AnyRelayOutput, pulse_duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            channel,
            output,
            pulse_duration,
            inner: Mutex::new(Inner {
                state: RelayState::Normal,
                history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
            }),
            pulsing: AtomicBool::new(false),
        })
    }

    pub fn channel(&self) -> ReaderChannel {
        self.channel
    }

    pub fn state(&self) -> RelayState {
        self.inner.lock().state
    }

    pub fn is_enabled(&self) -> bool {
        self.output.is_enabled()
    }

    pub fn status(&self) -> RelayStatus {
        RelayStatus {
            channel: self.channel,
            state: self.state(),
            enabled: self.is_enabled(),
            pulsing: self.pulsing.load(Ordering::SeqCst),
        }
    }

    /// Transitions oldest first.
    pub fn history(&self) -> Vec<RelayTransition> {
        self.inner.lock().history.iter().copied().collect()
    }

    /// Apply an action and wait for it to finish (a pulse included).
    ///
    /// # Errors
    ///
    /// Returns the output error converted into the core taxonomy; the logical
    /// state is unchanged in that case.
    pub async fn apply(&self, action: RelayAction) -> Result<RelayState> {
        let next = match action {
            RelayAction::OpenHold => {
                self.write(PinLevel::Low)?;
                RelayState::OpenHold
            }
            RelayAction::CloseHold => {
                self.write(PinLevel::High)?;
                RelayState::CloseHold
            }
            RelayAction::Normal => RelayState::Normal,
            RelayAction::NormalRfid => {
                self.record(action, RelayState::Normal);
                self.pulse().await?;
                return Ok(RelayState::Normal);
            }
        };

        self.record(action, next);
        info!(channel = %self.channel, %action, state = %next, "Relay action applied");
        Ok(next)
    }

    /// Start a one-shot pulse on a background task and return immediately.
    ///
    /// Returns `false` if the relay is not in `Normal`, a pulse is already
    /// running, or there is no runtime to run it on.
    pub fn trigger_pulse(self: &Arc<Self>) -> bool {
        if self.state() != RelayState::Normal {
            debug!(channel = %self.channel, state = %self.state(), "Relay held, pulse skipped");
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(channel = %self.channel, "No runtime available for relay pulse");
            return false;
        };
        if self.pulsing.load(Ordering::SeqCst) {
            debug!(channel = %self.channel, "Relay pulse already running");
            return false;
        }

        let actuator = Arc::clone(self);
        runtime.spawn(async move {
            if let Err(e) = actuator.pulse().await {
                warn!(channel = %actuator.channel, error = %e, "Relay pulse failed");
            }
        });
        true
    }

    async fn pulse(&self) -> Result<()> {
        if self
            .pulsing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let result = async {
            self.write(PinLevel::Low)?;
            tokio::time::sleep(self.pulse_duration).await;
            self.write(PinLevel::High)
        }
        .await;

        self.pulsing.store(false, Ordering::SeqCst);
        if result.is_ok() {
            debug!(channel = %self.channel, "Relay pulsed");
        }
        result
    }

    fn write(&self, level: PinLevel) -> Result<()> {
        self.output.set_level(level).map_err(|e| {
            warn!(channel = %self.channel, ?level, error = %e, "Relay write failed");
            Error::from(e)
        })
    }

    fn record(&self, action: RelayAction, to: RelayState) {
        let mut inner = self.inner.lock();
        let from = inner.state;
        inner.state = to;
        if inner.history.len() >= MAX_HISTORY_SIZE {
            inner.history.pop_front();
        }
        inner.history.push_back(RelayTransition {
            from,
            to,
            action,
            at: Instant::now(),
        });
    }
}
