use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a [`VaultError`], stable across crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Authorization,
    Conflict,
    StorageIo,
    TransientStore,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Authorization => "authorization",
            Self::Conflict => "conflict",
            Self::StorageIo => "storage_io",
            Self::TransientStore => "transient_store",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the storage engine to its callers.
///
/// The `Display` output carries internal detail for logs. Use
/// [`VaultError::public_message`] for anything shown to end users.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The request was malformed or exceeded a limit.
    #[error("validation error: {0}")]
    Validation(String),

    /// The file, content or ticket does not exist or is not visible to the caller.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller is not allowed to perform this operation.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// A stored invariant was violated (e.g. a reference count below zero).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Reading or writing blob storage failed.
    #[error("storage I/O error: {0}")]
    StorageIo(String),

    /// The metadata store failed in a way that may succeed on retry.
    #[error("transient store error: {0}")]
    TransientStore(String),

    /// Any other backend failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::StorageIo(_) => ErrorKind::StorageIo,
            Self::TransientStore(_) => ErrorKind::TransientStore,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to return to an end user.
    ///
    /// Storage and backend failures collapse to a generic message so that
    /// paths, digests and SQL never leave the process.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::NotFound(_) => "not found".to_owned(),
            Self::Authorization(_) => "not allowed".to_owned(),
            Self::TransientStore(_) => "service temporarily unavailable, please retry".to_owned(),
            Self::Conflict(_) | Self::StorageIo(_) | Self::Internal(_) => {
                "internal error".to_owned()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }
}
