use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use vault_core::Digest;

use crate::error::BlobError;

/// A readable handle onto a stored blob.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Result of a [`BlobStore::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenBlob {
    /// Location of the blob.
    pub path: String,
    /// `false` when identical content was already stored at `path`.
    pub created: bool,
}

/// Content-addressed byte storage.
///
/// Paths are derived deterministically from the digest and extension, so
/// concurrent writers of the same content converge on one file. The store
/// has no notion of reference counts; the content catalog decides when a
/// blob may be deleted.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Path a blob with this digest and extension lives at.
    fn path_for(&self, digest: &Digest, extension: &str) -> String;

    /// Check whether the blob for `digest` exists, returning its path either way.
    async fn exists(&self, digest: &Digest, extension: &str) -> Result<(bool, String), BlobError>;

    /// Check whether a blob exists at a previously returned path.
    async fn contains(&self, path: &str) -> Result<bool, BlobError>;

    /// Persist `data` under its digest.
    ///
    /// Writing over an existing blob is a no-op. The blob is only visible
    /// at its final path once all bytes are durable.
    async fn write(
        &self,
        digest: &Digest,
        extension: &str,
        data: Bytes,
    ) -> Result<WrittenBlob, BlobError>;

    /// Read a whole blob into memory.
    async fn read(&self, path: &str) -> Result<Bytes, BlobError>;

    /// Open a blob for streaming.
    async fn open(&self, path: &str) -> Result<BlobReader, BlobError>;

    /// Delete a blob. Returns `true` if it existed.
    async fn delete(&self, path: &str) -> Result<bool, BlobError>;
}
