use std::sync::Arc;

use chrono::TimeDelta;
use tokio_util::task::TaskTracker;
use tracing::debug;

use vault_blob::{BlobReader, BlobStore};
use vault_core::{
    Caller, Clock, ContentBlob, ContentId, DuplicateContent, FileId, FileRecord, FileUpdate,
    OwnerId, StorageStats, VaultError, sanitize_filename,
};
use vault_store::MetadataStore;

use crate::background::BackgroundHandle;
use crate::config::EngineConfig;
use crate::metrics::EngineMetrics;

/// Entry point for every storage operation.
///
/// Built with [`VaultBuilder`](crate::VaultBuilder). Cloning is cheap; all
/// clones share the same stores, metrics and background queue.
#[derive(Clone)]
pub struct Vault {
    pub(crate) store: Arc<dyn MetadataStore>,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: EngineConfig,
    pub(crate) ticket_ttl: TimeDelta,
    pub(crate) metrics: Arc<EngineMetrics>,
    pub(crate) background: BackgroundHandle,
    /// Upload stages detached from their callers.
    pub(crate) uploads: TaskTracker,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Vault {
    /// Rename, retag, move or change the visibility of a file the caller owns.
    ///
    /// Files owned by someone else are reported as not found. The content
    /// reference is never touched.
    pub async fn update_file(
        &self,
        caller: &Caller,
        file_id: FileId,
        mut update: FileUpdate,
    ) -> Result<FileRecord, VaultError> {
        if update.is_empty() {
            return Err(VaultError::Validation("no fields to update".into()));
        }
        if let Some(name) = update.name.take() {
            update.name = Some(sanitize_filename(name.as_bytes()));
        }

        let now = self.clock.now();
        let updated = self
            .store
            .update_file(file_id, caller.id, &update, now)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("file {file_id}")))?;
        debug!(file_id = %file_id, "file updated");
        Ok(updated)
    }

    pub async fn file(&self, file_id: FileId) -> Result<Option<FileRecord>, VaultError> {
        Ok(self.store.file(file_id).await?)
    }

    /// Files owned by `owner`, newest first.
    pub async fn files_for_owner(&self, owner: OwnerId) -> Result<Vec<FileRecord>, VaultError> {
        Ok(self.store.files_for_owner(owner).await?)
    }

    pub async fn content(&self, content_id: ContentId) -> Result<Option<ContentBlob>, VaultError> {
        Ok(self.store.content(content_id).await?)
    }

    pub async fn storage_stats(&self) -> Result<StorageStats, VaultError> {
        Ok(self.store.storage_stats().await?)
    }

    pub async fn owner_storage_stats(&self, owner: OwnerId) -> Result<StorageStats, VaultError> {
        Ok(self.store.owner_storage_stats(owner).await?)
    }

    /// Contents shared by more than one file, most shared first.
    pub async fn duplicate_contents(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<DuplicateContent>, VaultError> {
        Ok(self.store.duplicate_contents(limit, offset).await?)
    }

    /// Open a blob returned in a [`DownloadGrant`](vault_core::DownloadGrant).
    pub async fn open_blob(&self, path: &str) -> Result<BlobReader, VaultError> {
        Ok(self.blobs.open(path).await?)
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Handle onto the background queue, mainly for [`flush`](BackgroundHandle::flush).
    pub fn background(&self) -> &BackgroundHandle {
        &self.background
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
