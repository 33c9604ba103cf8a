use serde::Serialize;
use tracing::{error, info, warn};

use vault_core::{Caller, ContentBlob, ContentId, FileId, VaultError};
use vault_store::{MetadataTx, StoreError};

use crate::background::Job;
use crate::vault::Vault;

/// Result of a successful [`Vault::delete_file`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub file_id: FileId,
    pub content_id: ContentId,
    /// References left on the content after this delete.
    pub remaining_references: i64,
    /// Whether this delete released the content and its blob.
    pub reclaimed: bool,
}

impl Vault {
    /// Delete a file the caller owns, or any file if the caller is an admin.
    ///
    /// The file row and its content row stay locked from authorization to
    /// commit. When the last reference goes, the blob is handed to the
    /// background worker after commit; its removal never affects the result.
    pub async fn delete_file(
        &self,
        caller: &Caller,
        file_id: FileId,
    ) -> Result<DeleteOutcome, VaultError> {
        let mut tx = self.store.begin().await?;
        let (outcome, released) = match self.delete_in(tx.as_mut(), caller, file_id).await {
            Ok(done) => done,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, file_id = %file_id, "delete rollback failed");
                }
                return Err(e);
            }
        };
        tx.commit().await?;

        if let Some(content) = released {
            self.background.enqueue(Job::DeleteBlob {
                digest: content.digest,
                path: content.path,
            });
            self.metrics.increment_reclaimed();
        }
        self.metrics.increment_deletes();
        info!(
            file_id = %file_id,
            content_id = %outcome.content_id,
            remaining = outcome.remaining_references,
            reclaimed = outcome.reclaimed,
            "file deleted"
        );
        Ok(outcome)
    }

    async fn delete_in(
        &self,
        tx: &mut dyn MetadataTx,
        caller: &Caller,
        file_id: FileId,
    ) -> Result<(DeleteOutcome, Option<ContentBlob>), VaultError> {
        let file = tx
            .lock_file(file_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("file {file_id}")))?;

        if !caller.can_manage(file.owner_id) {
            warn!(
                file_id = %file_id,
                caller = %caller.id,
                "delete refused: caller does not own file"
            );
            return Err(VaultError::Authorization(format!(
                "caller {} may not delete file {file_id}",
                caller.id
            )));
        }

        let remaining = match tx.decrement(file.content_id).await {
            Ok(n) => n,
            Err(StoreError::Conflict(msg)) => {
                error!(
                    file_id = %file_id,
                    content_id = %file.content_id,
                    detail = %msg,
                    "reference count already zero for a referenced content"
                );
                return Err(VaultError::Conflict(msg));
            }
            Err(e) => return Err(e.into()),
        };

        let released = if remaining <= 0 {
            Some(tx.reclaim(file.content_id).await?)
        } else {
            None
        };

        tx.remove_file(file_id).await?;

        Ok((
            DeleteOutcome {
                file_id,
                content_id: file.content_id,
                remaining_references: remaining.max(0),
                reclaimed: released.is_some(),
            },
            released,
        ))
    }
}
