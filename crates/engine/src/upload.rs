use bytes::Bytes;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vault_blob::{extension_for_mime, fingerprint};
use vault_core::{
    Caller, Digest, FileId, FileRecord, FolderId, NewContent, NewFileRecord, VaultError,
    sanitize_filename, sanitize_mime_type,
};
use vault_store::{MetadataTx, RegisteredContent};

use crate::background::Job;
use crate::vault::Vault;

/// One file in an upload batch, exactly as the client declared it.
#[derive(Debug, Clone)]
pub struct UploadItem {
    /// Declared file name. May be any bytes, including invalid UTF-8.
    pub name: Vec<u8>,
    /// Declared MIME type.
    pub mime: Vec<u8>,
    pub data: Bytes,
}

impl UploadItem {
    pub fn new(name: impl Into<Vec<u8>>, mime: impl Into<Vec<u8>>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            data: data.into(),
        }
    }
}

/// An item after sanitization and fingerprinting.
struct Prepared {
    name: String,
    mime_type: String,
    digest: Digest,
    extension: String,
    data: Bytes,
}

/// Where the bytes of a prepared item ended up before registration.
struct Placement {
    /// Path derived from this item's digest and extension.
    path: String,
    /// Whether this item created the blob at `path`.
    created: bool,
}

impl Vault {
    /// Store a batch of files for `caller`.
    ///
    /// Items are processed concurrently and independently; the result holds
    /// one entry per item in input order. Cancelling `cancel` stops items that
    /// have not yet written their blob; items past that point finish even if
    /// this future is dropped (see [`wait_for_uploads`](Self::wait_for_uploads)).
    pub async fn upload_files(
        &self,
        caller: &Caller,
        folder_id: Option<FolderId>,
        items: Vec<UploadItem>,
        cancel: &CancellationToken,
    ) -> Vec<Result<FileRecord, VaultError>> {
        let uploads = items
            .into_iter()
            .map(|item| self.upload_one(caller, folder_id, item, cancel));
        join_all(uploads).await
    }

    async fn upload_one(
        &self,
        caller: &Caller,
        folder_id: Option<FolderId>,
        item: UploadItem,
        cancel: &CancellationToken,
    ) -> Result<FileRecord, VaultError> {
        let result = self.try_upload(caller, folder_id, item, cancel).await;
        if let Err(e) = &result {
            self.metrics.increment_upload_failures();
            debug!(error = %e, owner = %caller.id, "upload item failed");
        }
        result
    }

    async fn try_upload(
        &self,
        caller: &Caller,
        folder_id: Option<FolderId>,
        item: UploadItem,
        cancel: &CancellationToken,
    ) -> Result<FileRecord, VaultError> {
        ensure_not_cancelled(cancel)?;
        let prepared = self.prepare(item)?;
        ensure_not_cancelled(cancel)?;

        // From the blob write onward the item runs to completion on its own
        // task, even if this future is dropped.
        let vault = self.clone();
        let caller = *caller;
        self.uploads
            .spawn(async move { vault.store_prepared(&caller, folder_id, prepared).await })
            .await
            .map_err(|e| VaultError::Internal(format!("upload task failed: {e}")))?
    }

    async fn store_prepared(
        &self,
        caller: &Caller,
        folder_id: Option<FolderId>,
        prepared: Prepared,
    ) -> Result<FileRecord, VaultError> {
        let placement = self.place(&prepared).await?;

        let outcome = self.register(caller, folder_id, &prepared, &placement).await;
        let (record, registered) = match outcome {
            Ok(done) => done,
            Err(e) => {
                if placement.created {
                    self.release_unreferenced(&prepared.digest, &placement.path);
                }
                return Err(e);
            }
        };

        // Lost the race to a row for the same digest stored under another
        // extension; our copy is unreferenced.
        if placement.created && registered.content.path != placement.path {
            self.release_unreferenced(&prepared.digest, &placement.path);
        }

        self.metrics.increment_uploads();
        if !registered.inserted {
            self.metrics.increment_deduplicated();
        }
        info!(
            file_id = %record.id,
            owner = %record.owner_id,
            content_id = %record.content_id,
            size = registered.content.size,
            deduplicated = !registered.inserted,
            "file uploaded"
        );
        Ok(record)
    }

    /// Wait until every upload that has started writing has been registered
    /// or released, including those whose callers went away.
    pub async fn wait_for_uploads(&self) {
        self.uploads.close();
        self.uploads.wait().await;
        self.uploads.reopen();
    }

    fn prepare(&self, item: UploadItem) -> Result<Prepared, VaultError> {
        let size = item.data.len() as u64;
        if size > self.config.max_upload_bytes {
            return Err(VaultError::Validation(format!(
                "file exceeds the {} byte upload limit",
                self.config.max_upload_bytes
            )));
        }

        let mime_type = sanitize_mime_type(&item.mime);
        Ok(Prepared {
            name: sanitize_filename(&item.name),
            extension: extension_for_mime(&mime_type),
            mime_type,
            digest: fingerprint(&item.data),
            data: item.data,
        })
    }

    /// Make sure the bytes are on disk before anything references them.
    async fn place(&self, prepared: &Prepared) -> Result<Placement, VaultError> {
        let path = self.blobs.path_for(&prepared.digest, &prepared.extension);

        if let Some(existing) = self.store.content_by_digest(&prepared.digest).await?
            && self.blobs.contains(&existing.path).await?
        {
            debug!(digest = %prepared.digest, "reusing stored blob");
            return Ok(Placement {
                path,
                created: false,
            });
        }

        let written = self
            .blobs
            .write(&prepared.digest, &prepared.extension, prepared.data.clone())
            .await?;
        Ok(Placement {
            path: written.path,
            created: written.created,
        })
    }

    /// Register the content and bind a new file record to it in one transaction.
    async fn register(
        &self,
        caller: &Caller,
        folder_id: Option<FolderId>,
        prepared: &Prepared,
        placement: &Placement,
    ) -> Result<(FileRecord, RegisteredContent), VaultError> {
        let mut tx = self.store.begin().await?;
        match self
            .register_in(tx.as_mut(), caller, folder_id, prepared, placement)
            .await
        {
            Ok(done) => {
                tx.commit().await?;
                Ok(done)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "upload rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn register_in(
        &self,
        tx: &mut dyn MetadataTx,
        caller: &Caller,
        folder_id: Option<FolderId>,
        prepared: &Prepared,
        placement: &Placement,
    ) -> Result<(FileRecord, RegisteredContent), VaultError> {
        let now = self.clock.now();
        let new_content = NewContent {
            digest: prepared.digest.clone(),
            path: placement.path.clone(),
            size: i64::try_from(prepared.data.len())
                .map_err(|_| VaultError::Validation("file too large".into()))?,
            mime_type: prepared.mime_type.clone(),
        };
        let registered = tx.register_or_increment(&new_content, now).await?;

        // The row is now locked by this transaction. If its blob vanished
        // between placement and registration, put the bytes back.
        let row_path = &registered.content.path;
        if !self.blobs.contains(row_path).await? {
            if *row_path != placement.path {
                return Err(VaultError::StorageIo(format!(
                    "blob for content {} is missing",
                    registered.content.id
                )));
            }
            warn!(digest = %prepared.digest, "blob vanished before registration, rewriting");
            self.blobs
                .write(&prepared.digest, &prepared.extension, prepared.data.clone())
                .await?;
        }

        let record = tx
            .insert_file(NewFileRecord {
                id: FileId::new(),
                owner_id: caller.id,
                content_id: registered.content.id,
                name: prepared.name.clone(),
                folder_id,
                tags: Vec::new(),
                is_public: false,
                created_at: now,
            })
            .await?;
        Ok((record, registered))
    }

    fn release_unreferenced(&self, digest: &Digest, path: &str) {
        self.background.enqueue(Job::DeleteBlob {
            digest: digest.clone(),
            path: path.to_owned(),
        });
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), VaultError> {
    if cancel.is_cancelled() {
        return Err(VaultError::Validation("upload cancelled".into()));
    }
    Ok(())
}
