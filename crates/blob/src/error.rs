use thiserror::Error;

use vault_core::VaultError;

/// Errors that can occur during blob storage operations.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The requested blob was not found.
    #[error("blob not found: {0}")]
    NotFound(String),

    /// The path does not name a blob under the store root.
    #[error("invalid blob path: {0}")]
    InvalidPath(String),

    /// A filesystem error occurred.
    #[error("blob storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BlobError> for VaultError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::NotFound(msg) => Self::NotFound(msg),
            other => Self::StorageIo(other.to_string()),
        }
    }
}
