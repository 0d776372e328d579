//! Error types for hardware operations.
//!
//! This module defines error types specific to edge sources and relay
//! outputs: disconnection, unavailable hardware, invalid wiring and
//! low-level I/O failures.

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur during hardware device operations.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Device is not connected or has been disconnected.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// The hardware interface is not present on this host.
    #[error("Hardware unavailable: {message}")]
    Unavailable { message: String },

    /// Pin wiring or channel configuration is invalid.
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// Writing to an output failed.
    #[error("Output error on pin {pin}: {message}")]
    OutputError { pin: u8, message: String },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Create a new output error.
    pub fn output(pin: u8, message: impl Into<String>) -> Self {
        Self::OutputError {
            pin,
            message: message.into(),
        }
    }
}

impl From<HardwareError> for gatehouse_core::Error {
    fn from(err: HardwareError) -> Self {
        match err {
            HardwareError::Unavailable { .. } | HardwareError::ConfigurationError { .. } => {
                gatehouse_core::Error::Configuration(err.to_string())
            }
            other => gatehouse_core::Error::TransientIo(other.to_string()),
        }
    }
}
