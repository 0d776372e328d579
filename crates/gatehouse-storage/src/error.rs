use std::path::PathBuf;
use thiserror::Error;

/// Storage-specific error types for the gatehouse gateway.
///
/// These errors represent failures reading or writing the JSON stores and
/// the evidence directory.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Store contents could not be encoded or decoded
    #[error("JSON error in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Entity not found in a store
    #[error("Entity not found: {entity_type} {value}")]
    NotFound { entity_type: String, value: String },

    /// Data validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Required directory could not be created
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    pub fn not_found(entity_type: impl Into<String>, value: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            value: value.to_string(),
        }
    }
}

impl From<StorageError> for gatehouse_core::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io { .. } => gatehouse_core::Error::TransientIo(err.to_string()),
            StorageError::Json { .. } | StorageError::Validation(_) | StorageError::NotFound { .. } => {
                gatehouse_core::Error::MalformedInput(err.to_string())
            }
            StorageError::Configuration(msg) => gatehouse_core::Error::FatalStartup(msg),
        }
    }
}

/// Specialized result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
