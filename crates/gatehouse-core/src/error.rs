use thiserror::Error;

/// Gateway-wide error taxonomy.
///
/// Component crates carry their own richer error enums; this type is what
/// crosses component boundaries and what startup reports. Only
/// [`Error::FatalStartup`] is allowed to abort the process.
#[derive(Error, Debug)]
pub enum Error {
    /// Disk contention or a failed write that a later attempt may fix.
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// Cloud store unreachable or timed out.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Input that can never be processed: wrong frame width, unparsable
    /// timestamp, non-numeric card id.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A component is missing what it needs to run and degrades to a no-op.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Required paths could not be created.
    #[error("Fatal startup error: {0}")]
    FatalStartup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn fatal_startup(message: impl Into<String>) -> Self {
        Self::FatalStartup(message.into())
    }

    /// Whether a retry at a coarser granularity can be expected to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_) | Self::TransientNetwork(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
