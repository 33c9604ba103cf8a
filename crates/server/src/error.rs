use thiserror::Error;

use vault_blob::BlobError;
use vault_core::VaultError;
use vault_store::StoreError;

/// Errors that can occur when running the vault server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. reading the config file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The metadata backend could not be opened.
    #[error("metadata store error: {0}")]
    Store(#[from] StoreError),

    /// The blob volume could not be opened.
    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    /// An engine operation failed.
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
}
