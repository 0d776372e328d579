use thiserror::Error;

/// Errors returned by remote collaborators (cloud store, change feed,
/// evidence uploader).
#[derive(Debug, Error)]
pub enum CloudError {
    /// The collaborator is not configured on this gateway
    #[error("{service} is disabled")]
    Disabled { service: &'static str },

    /// Remote endpoint could not be reached
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    /// Remote call did not complete in time; the write may or may not have
    /// been applied
    #[error("Remote call timed out after {0}ms")]
    Timeout(u64),

    /// Remote refused the request; retrying will not help
    #[error("Remote rejected request: {0}")]
    Rejected(String),

    /// Local I/O while preparing a request
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CloudError {
    pub fn disabled(service: &'static str) -> Self {
        Self::Disabled { service }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_) | Self::Io(_))
    }
}

impl From<CloudError> for gatehouse_core::Error {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::Disabled { .. } => gatehouse_core::Error::Configuration(err.to_string()),
            CloudError::Rejected(_) => gatehouse_core::Error::MalformedInput(err.to_string()),
            CloudError::Unavailable(_) | CloudError::Timeout(_) | CloudError::Io(_) => {
                gatehouse_core::Error::TransientNetwork(err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CloudError::Timeout(100).is_transient());
        assert!(CloudError::unavailable("dns").is_transient());
        assert!(!CloudError::rejected("bad schema").is_transient());
        assert!(!CloudError::disabled("cloud store").is_transient());
    }

    #[test]
    fn test_into_core_taxonomy() {
        let core: gatehouse_core::Error = CloudError::Timeout(5).into();
        assert!(core.is_transient());

        let core: gatehouse_core::Error = CloudError::disabled("uploader").into();
        assert!(matches!(core, gatehouse_core::Error::Configuration(_)));
    }
}
