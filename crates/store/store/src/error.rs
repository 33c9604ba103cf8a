use thiserror::Error;

use vault_core::VaultError;

/// Errors from metadata store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A stored invariant would be violated, e.g. decrementing a reference
    /// count that is already zero.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Serialization failure, deadlock or lock timeout. Safe to retry.
    #[error("transient error: {0}")]
    Transient(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl StoreError {
    /// Whether the failed operation may succeed if retried unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Transient(_) | Self::Timeout(_)
        )
    }
}

impl From<StoreError> for VaultError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            e if e.is_transient() => Self::TransientStore(e.to_string()),
            e => Self::Internal(e.to_string()),
        }
    }
}
