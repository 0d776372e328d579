//! Evidence upload collaborator.

#![allow(async_fn_in_trait)]

use crate::error::{CloudError, Result};
use crate::mock::MockUploader;
use gatehouse_core::constants::MAX_UPLOAD_BYTES;
use std::path::Path;

/// Uploads one still and returns its remote location.
pub trait EvidenceUploader: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<String>;
}

/// Enum wrapper for uploader dispatch.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AnyEvidenceUploader {
    /// No upload endpoint configured.
    Disabled,

    Mock(MockUploader),
}

impl AnyEvidenceUploader {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl EvidenceUploader for AnyEvidenceUploader {
    async fn upload(&self, path: &Path) -> Result<String> {
        match self {
            Self::Disabled => Err(CloudError::disabled("evidence uploader")),
            Self::Mock(uploader) => uploader.upload(path).await,
        }
    }
}

/// Reject paths that are not regular files or exceed the upload limit.
///
/// # Errors
///
/// `CloudError::Io` if the file cannot be inspected, `CloudError::Rejected`
/// if it is not a file or is too large. Neither is transient.
pub async fn check_uploadable(path: &Path) -> Result<u64> {
    let meta = tokio::fs::metadata(path).await?;
    if !meta.is_file() {
        return Err(CloudError::rejected(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    if meta.len() > MAX_UPLOAD_BYTES {
        return Err(CloudError::rejected(format!(
            "{} is {} bytes, limit is {MAX_UPLOAD_BYTES}",
            path.display(),
            meta.len()
        )));
    }
    Ok(meta.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_disabled_uploader() {
        let uploader = AnyEvidenceUploader::Disabled;
        assert!(!uploader.is_enabled());
        assert!(matches!(
            uploader.upload(Path::new("a.jpg")).await,
            Err(CloudError::Disabled { .. })
        ));
    }

    #[tokio::test]
    async fn test_check_uploadable() {
        let dir = TempDir::new().unwrap();
        let small = dir.path().join("small.jpg");
        tokio::fs::write(&small, vec![0u8; 16]).await.unwrap();
        assert_eq!(check_uploadable(&small).await.unwrap(), 16);

        let large = dir.path().join("large.jpg");
        let file = std::fs::File::create(&large).unwrap();
        file.set_len(MAX_UPLOAD_BYTES + 1).unwrap();
        assert!(matches!(
            check_uploadable(&large).await,
            Err(CloudError::Rejected(_))
        ));

        assert!(check_uploadable(dir.path()).await.is_err());
        assert!(matches!(
            check_uploadable(&dir.path().join("missing.jpg")).await,
            Err(CloudError::Io(_))
        ));
    }
}
