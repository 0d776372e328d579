//! Mock device implementations for testing and development.
//!
//! This module provides simulated device implementations that can be controlled
//! programmatically without requiring physical hardware.

pub mod edge;
pub mod relay;

// Re-export commonly used types
pub use edge::{MockEdgeHandle, MockEdgeSource};
pub use relay::{MockRelay, RelayWrite};
