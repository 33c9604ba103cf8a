use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use vault_core::Digest;

use crate::error::BlobError;
use crate::store::{BlobReader, BlobStore, WrittenBlob};

/// Filesystem-backed [`BlobStore`].
///
/// Blobs live at `{root}/{digest[..2]}/{digest}.{ext}`. Writes go to a
/// uniquely named temporary file in the same directory and are renamed into
/// place after `fsync`, so readers never observe a partial blob.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a new `FsBlobStore` rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, digest: &Digest, extension: &str) -> PathBuf {
        self.root
            .join(digest.shard())
            .join(format!("{digest}.{extension}"))
    }

    /// Resolve a stored path, refusing anything that escapes the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, BlobError> {
        let candidate = Path::new(path);
        let escapes = candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        if escapes || !candidate.starts_with(&self.root) {
            return Err(BlobError::InvalidPath(path.to_owned()));
        }
        Ok(candidate.to_path_buf())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn path_for(&self, digest: &Digest, extension: &str) -> String {
        self.blob_path(digest, extension).to_string_lossy().into_owned()
    }

    async fn exists(&self, digest: &Digest, extension: &str) -> Result<(bool, String), BlobError> {
        let path = self.blob_path(digest, extension);
        let found = fs::try_exists(&path).await?;
        Ok((found, path.to_string_lossy().into_owned()))
    }

    async fn contains(&self, path: &str) -> Result<bool, BlobError> {
        let path = self.resolve(path)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn write(
        &self,
        digest: &Digest,
        extension: &str,
        data: Bytes,
    ) -> Result<WrittenBlob, BlobError> {
        let path = self.blob_path(digest, extension);
        let display = path.to_string_lossy().into_owned();

        if fs::try_exists(&path).await? {
            return Ok(WrittenBlob {
                path: display,
                created: false,
            });
        }

        let dir = path
            .parent()
            .ok_or_else(|| BlobError::InvalidPath(display.clone()))?;
        fs::create_dir_all(dir).await?;

        let temp_path = dir.join(format!(
            "{digest}.{extension}.{}.tmp",
            uuid::Uuid::new_v4().simple()
        ));
        let written: std::io::Result<()> = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&temp_path).await
                && cleanup.kind() != ErrorKind::NotFound
            {
                warn!(error = %cleanup, "failed to remove temporary blob file");
            }
            return Err(e.into());
        }

        debug!(digest = %digest, size = data.len(), "blob written");
        Ok(WrittenBlob {
            path: display,
            created: true,
        })
    }

    async fn read(&self, path: &str) -> Result<Bytes, BlobError> {
        let resolved = self.resolve(path)?;
        match fs::read(&resolved).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlobError::NotFound(path.to_owned())),
            Err(e) => Err(e.into()),
        }
    }

    async fn open(&self, path: &str) -> Result<BlobReader, BlobError> {
        let resolved = self.resolve(path)?;
        match fs::File::open(&resolved).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlobError::NotFound(path.to_owned())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<bool, BlobError> {
        let resolved = self.resolve(path)?;
        match fs::remove_file(&resolved).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
