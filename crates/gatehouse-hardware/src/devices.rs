//! Enum wrappers for hardware device dispatch.
//!
//! Native `async fn` in traits (RPITIT) is not object-safe, so instead of
//! `Box<dyn EdgeSource>` the gateway holds concrete enums and dispatches at
//! compile time. Relay outputs use the same pattern so the gateway wiring
//! treats both device kinds alike.
//!
//! # Examples
//!
//! ```
//! use gatehouse_hardware::devices::{AnyEdgeSource, AnyRelayOutput};
//! use gatehouse_hardware::mock::{MockEdgeSource, MockRelay};
//!
//! let (source, _handle) = MockEdgeSource::new();
//! let source = AnyEdgeSource::Mock(source);
//!
//! let relay = AnyRelayOutput::Mock(MockRelay::new("relay 1", 25));
//! assert!(relay.is_enabled());
//! assert!(!AnyRelayOutput::disabled(26).is_enabled());
//! ```

use crate::mock::{MockEdgeSource, MockRelay};
use crate::traits::{EdgeSource, RelayOutput};
use crate::types::{Edge, PinLevel};
use crate::{HardwareError, Result};

/// Enum wrapper for edge source dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyEdgeSource {
    /// Mock edge source for development, simulation and testing.
    Mock(MockEdgeSource),
}

impl EdgeSource for AnyEdgeSource {
    async fn next_edge(&mut self) -> Result<Edge> {
        match self {
            Self::Mock(source) => source.next_edge().await,
        }
    }

    async fn release(&mut self) -> Result<()> {
        match self {
            Self::Mock(source) => source.release().await,
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Mock(source) => source.name(),
        }
    }
}

/// Enum wrapper for relay output dispatch.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AnyRelayOutput {
    /// Mock relay for development, simulation and testing.
    Mock(MockRelay),

    /// No output hardware on this host. Every write fails with
    /// `HardwareError::Unavailable` so callers can report it.
    Disabled { pin: u8 },
}

impl AnyRelayOutput {
    pub fn disabled(pin: u8) -> Self {
        Self::Disabled { pin }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled { .. })
    }
}

impl RelayOutput for AnyRelayOutput {
    fn set_level(&self, level: PinLevel) -> Result<()> {
        match self {
            Self::Mock(relay) => relay.set_level(level),
            Self::Disabled { pin } => Err(HardwareError::unavailable(format!(
                "relay output on pin {pin} is disabled"
            ))),
        }
    }

    fn level(&self) -> Option<PinLevel> {
        match self {
            Self::Mock(relay) => relay.level(),
            Self::Disabled { .. } => None,
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Mock(relay) => relay.name(),
            Self::Disabled { .. } => "disabled",
        }
    }
}
