use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vault_core::{
    ContentBlob, ContentId, Digest, DownloadTicket, DuplicateContent, FileId, FileRecord,
    FileUpdate, NewContent, NewFileRecord, OwnerId, StorageStats, TicketId,
};

use crate::error::StoreError;

/// Outcome of [`MetadataTx::register_or_increment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredContent {
    /// The content row after the upsert.
    pub content: ContentBlob,
    /// `true` if this call created the row, `false` if it incremented an existing one.
    pub inserted: bool,
}

/// A metadata transaction.
///
/// All mutations of content reference counts and file records happen inside
/// one of these. Dropping a transaction without calling [`commit`](Self::commit)
/// discards every change made through it.
#[async_trait]
pub trait MetadataTx: Send {
    /// Insert a content row with reference count 1, or atomically add one
    /// to the existing row for the same digest.
    async fn register_or_increment(
        &mut self,
        content: &NewContent,
        now: DateTime<Utc>,
    ) -> Result<RegisteredContent, StoreError>;

    /// Serialize with every other transaction touching `digest` and return
    /// its content row, if one is committed.
    ///
    /// Registration of the same digest in another transaction blocks until
    /// this one ends, so a blob may be removed safely while the lock is held
    /// and no row references it.
    async fn lock_digest(&mut self, digest: &Digest) -> Result<Option<ContentBlob>, StoreError>;

    /// Lock a content row for the rest of the transaction and decrement its
    /// reference count. Returns the new count.
    ///
    /// Fails with [`StoreError::Conflict`] if the count is already zero and
    /// with [`StoreError::NotFound`] if the row does not exist.
    async fn decrement(&mut self, content_id: ContentId) -> Result<i64, StoreError>;

    /// Delete a content row whose count reached zero, returning the removed
    /// row so the caller can release its blob after commit.
    ///
    /// Callers must have decremented the row in this same transaction.
    async fn reclaim(&mut self, content_id: ContentId) -> Result<ContentBlob, StoreError>;

    /// Persist a new file record.
    async fn insert_file(&mut self, file: NewFileRecord) -> Result<FileRecord, StoreError>;

    /// Lock a file record for the rest of the transaction.
    async fn lock_file(&mut self, file_id: FileId) -> Result<Option<FileRecord>, StoreError>;

    /// Delete a file record. Returns `true` if it existed.
    async fn remove_file(&mut self, file_id: FileId) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Transactional store for the content catalog, the file registry and
/// download tickets.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// Callers must not use the non-transactional methods while holding a
/// transaction from the same store.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Start a new transaction.
    async fn begin(&self) -> Result<Box<dyn MetadataTx>, StoreError>;

    async fn content(&self, id: ContentId) -> Result<Option<ContentBlob>, StoreError>;

    async fn content_by_digest(&self, digest: &Digest) -> Result<Option<ContentBlob>, StoreError>;

    async fn file(&self, id: FileId) -> Result<Option<FileRecord>, StoreError>;

    /// All files owned by `owner`, newest first.
    async fn files_for_owner(&self, owner: OwnerId) -> Result<Vec<FileRecord>, StoreError>;

    /// Apply `update` to a file owned by `owner`.
    ///
    /// Returns `None` if the file does not exist or belongs to someone else.
    async fn update_file(
        &self,
        id: FileId,
        owner: OwnerId,
        update: &FileUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<FileRecord>, StoreError>;

    /// Add one to a file's download counter. Returns `false` if the file is gone.
    async fn increment_download_count(&self, id: FileId) -> Result<bool, StoreError>;

    async fn insert_ticket(&self, ticket: &DownloadTicket) -> Result<(), StoreError>;

    /// Fetch a ticket regardless of expiry.
    async fn ticket(&self, id: TicketId) -> Result<Option<DownloadTicket>, StoreError>;

    /// Delete every ticket with `expires_at <= now`. Returns the number removed.
    async fn purge_expired_tickets(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Deduplication savings across all owners.
    async fn storage_stats(&self) -> Result<StorageStats, StoreError>;

    /// Storage attributed to one owner, splitting shared content evenly
    /// across its current references.
    async fn owner_storage_stats(&self, owner: OwnerId) -> Result<StorageStats, StoreError>;

    /// Contents referenced more than once, most shared first.
    async fn duplicate_contents(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<DuplicateContent>, StoreError>;
}
