//! Mock relay output that records every write.

use crate::{HardwareError, Result, traits::RelayOutput, types::PinLevel};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::Instant;

/// A recorded output write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayWrite {
    pub level: PinLevel,
    pub at: Instant,
}

/// Mock relay for testing and development.
///
/// Clones share state, so a test can keep one clone to inspect what the
/// gateway wrote through another.
///
/// # Examples
///
/// ```
/// use gatehouse_hardware::mock::MockRelay;
/// use gatehouse_hardware::traits::RelayOutput;
/// use gatehouse_hardware::types::PinLevel;
///
/// let relay = MockRelay::new("relay 1", 25);
/// relay.set_level(PinLevel::Low).unwrap();
/// relay.set_level(PinLevel::High).unwrap();
///
/// assert_eq!(relay.levels(), vec![PinLevel::Low, PinLevel::High]);
/// assert_eq!(relay.pulse_count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockRelay {
    name: Arc<str>,
    pin: u8,
    writes: Arc<Mutex<Vec<RelayWrite>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MockRelay {
    pub fn new(name: impl Into<String>, pin: u8) -> Self {
        Self {
            name: Arc::from(name.into()),
            pin,
            writes: Arc::new(Mutex::new(Vec::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make subsequent writes fail, simulating a driver fault.
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Every write in order.
    pub fn writes(&self) -> Vec<RelayWrite> {
        self.writes.lock().clone()
    }

    /// Levels written, in order.
    pub fn levels(&self) -> Vec<PinLevel> {
        self.writes.lock().iter().map(|w| w.level).collect()
    }

    /// Number of completed low-then-high pulses.
    pub fn pulse_count(&self) -> usize {
        self.writes
            .lock()
            .windows(2)
            .filter(|w| w[0].level == PinLevel::Low && w[1].level == PinLevel::High)
            .count()
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }
}

impl RelayOutput for MockRelay {
    fn set_level(&self, level: PinLevel) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(HardwareError::output(self.pin, "simulated write failure"));
        }
        self.writes.lock().push(RelayWrite {
            level,
            at: Instant::now(),
        });
        Ok(())
    }

    fn level(&self) -> Option<PinLevel> {
        self.writes.lock().last().map(|w| w.level)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
