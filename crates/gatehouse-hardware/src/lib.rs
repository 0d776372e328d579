//! Hardware abstraction layer for the gatehouse gateway.
//!
//! This crate provides the GPIO-level peripherals the gateway needs: reader
//! data lines, which deliver timestamped edges, and relay outputs, which
//! drive the gate. Traits let mock implementations (for development,
//! simulation and testing) stand in for real drivers.
//!
//! # Device Traits
//!
//! - [`EdgeSource`]: async subscription yielding `(pin, level, tick)` edges
//! - [`RelayOutput`]: synchronous two-level output
//!
//! # Reader Manager
//!
//! [`ReaderManager`] runs one task per reader channel, feeding that channel's
//! edges through its own [`PulseDecoder`](gatehouse_protocol::PulseDecoder)
//! and merging complete frames into one [`ReaderEvent`] stream.
//!
//! # Error Handling
//!
//! All operations return [`Result<T>`][error::Result] with [`HardwareError`].
//! Missing hardware surfaces as `HardwareError::Unavailable`, which converts
//! into a configuration error: the affected component is disabled and the
//! rest of the gateway keeps running.
//!
//! [`EdgeSource`]: traits::EdgeSource
//! [`RelayOutput`]: traits::RelayOutput

pub mod devices;
pub mod error;
pub mod manager;
pub mod mock;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use devices::{AnyEdgeSource, AnyRelayOutput};
pub use error::{HardwareError, Result};
pub use traits::{EdgeSource, RelayOutput};
pub use types::{ChannelPins, Edge, PinLevel};

// Re-export manager types
pub use manager::{ReaderConfig, ReaderEvent, ReaderHandle, ReaderManager, ReaderStats};
