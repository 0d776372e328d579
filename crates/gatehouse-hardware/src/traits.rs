//! Hardware device trait definitions.
//!
//! These traits are the contract between the gateway and its GPIO-level
//! peripherals: an [`EdgeSource`] delivering reader data-line pulses and a
//! [`RelayOutput`] driving a gate relay. Mock and real implementations are
//! interchangeable behind the enum wrappers in [`devices`](crate::devices).
//!
//! `EdgeSource` uses native `async fn` (Edition 2024 RPITIT) and is therefore
//! not object-safe; relay writes are short synchronous register writes.

#![allow(async_fn_in_trait)]

use crate::error::Result;
use crate::types::{Edge, PinLevel};

/// Subscription to level changes on a reader's data lines.
///
/// # Examples
///
/// ```no_run
/// use gatehouse_hardware::traits::EdgeSource;
/// use gatehouse_hardware::error::Result;
///
/// async fn count_pulses<S: EdgeSource>(source: &mut S, n: usize) -> Result<usize> {
///     let mut falling = 0;
///     for _ in 0..n {
///         if source.next_edge().await?.is_falling() {
///             falling += 1;
///         }
///     }
///     source.release().await?;
///     Ok(falling)
/// }
/// ```
pub trait EdgeSource: Send {
    /// Wait for the next edge on any subscribed pin.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError::Disconnected` once the subscription is gone.
    async fn next_edge(&mut self) -> Result<Edge>;

    /// Cancel the pin subscriptions. Further `next_edge` calls fail.
    async fn release(&mut self) -> Result<()>;

    /// Human-readable source name for logs and status.
    fn name(&self) -> &str;
}

/// One two-level digital output.
pub trait RelayOutput: Send + Sync {
    /// Drive the output.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError::OutputError` if the write fails.
    fn set_level(&self, level: PinLevel) -> Result<()>;

    /// Last level written, if any.
    fn level(&self) -> Option<PinLevel>;

    /// Human-readable output name for logs and status.
    fn name(&self) -> &str;
}
