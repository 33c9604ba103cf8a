use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use vault_core::{
    ContentBlob, ContentId, Digest, DownloadTicket, DuplicateContent, FileId, FileRecord,
    FileUpdate, NewContent, NewFileRecord, OwnerId, StorageStats, TicketId,
};
use vault_store::error::StoreError;
use vault_store::store::{MetadataStore, MetadataTx, RegisteredContent};

#[derive(Debug, Clone, Default)]
struct Tables {
    contents: HashMap<ContentId, ContentBlob>,
    by_digest: HashMap<Digest, ContentId>,
    files: HashMap<FileId, FileRecord>,
    tickets: HashMap<TicketId, DownloadTicket>,
}

/// In-memory [`MetadataStore`].
///
/// A transaction holds the store's single lock from `begin` until it is
/// committed or dropped and works on a private copy of the tables, so
/// transactions are fully serialized. Intended for tests and single-process
/// deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadataStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryMetadataStore {
    /// Create a new, empty in-memory metadata store.
    pub fn new() -> Self {
        Self::default()
    }
}

/// A serialized transaction over [`MemoryMetadataStore`].
struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
}

#[async_trait]
impl MetadataTx for MemoryTx {
    async fn register_or_increment(
        &mut self,
        content: &NewContent,
        now: DateTime<Utc>,
    ) -> Result<RegisteredContent, StoreError> {
        if let Some(id) = self.work.by_digest.get(&content.digest)
            && let Some(existing) = self.work.contents.get_mut(id)
        {
            existing.reference_count += 1;
            return Ok(RegisteredContent {
                content: existing.clone(),
                inserted: false,
            });
        }

        let row = ContentBlob {
            id: ContentId::new(),
            digest: content.digest.clone(),
            path: content.path.clone(),
            size: content.size,
            mime_type: content.mime_type.clone(),
            reference_count: 1,
            created_at: now,
        };
        self.work.by_digest.insert(row.digest.clone(), row.id);
        self.work.contents.insert(row.id, row.clone());
        Ok(RegisteredContent {
            content: row,
            inserted: true,
        })
    }

    async fn lock_digest(&mut self, digest: &Digest) -> Result<Option<ContentBlob>, StoreError> {
        Ok(self
            .work
            .by_digest
            .get(digest)
            .and_then(|id| self.work.contents.get(id))
            .cloned())
    }

    async fn decrement(&mut self, content_id: ContentId) -> Result<i64, StoreError> {
        let row = self
            .work
            .contents
            .get_mut(&content_id)
            .ok_or_else(|| StoreError::NotFound(format!("content {content_id}")))?;
        if row.reference_count <= 0 {
            return Err(StoreError::Conflict(format!(
                "content {content_id} already has reference count {}",
                row.reference_count
            )));
        }
        row.reference_count -= 1;
        Ok(row.reference_count)
    }

    async fn reclaim(&mut self, content_id: ContentId) -> Result<ContentBlob, StoreError> {
        let row = self
            .work
            .contents
            .get(&content_id)
            .ok_or_else(|| StoreError::NotFound(format!("content {content_id}")))?;
        if row.reference_count > 0 {
            return Err(StoreError::Conflict(format!(
                "content {content_id} is still referenced"
            )));
        }
        let row = self
            .work
            .contents
            .remove(&content_id)
            .ok_or_else(|| StoreError::NotFound(format!("content {content_id}")))?;
        self.work.by_digest.remove(&row.digest);
        Ok(row)
    }

    async fn insert_file(&mut self, file: NewFileRecord) -> Result<FileRecord, StoreError> {
        if !self.work.contents.contains_key(&file.content_id) {
            return Err(StoreError::NotFound(format!("content {}", file.content_id)));
        }
        let record = file.into_record();
        self.work.files.insert(record.id, record.clone());
        Ok(record)
    }

    async fn lock_file(&mut self, file_id: FileId) -> Result<Option<FileRecord>, StoreError> {
        Ok(self.work.files.get(&file_id).cloned())
    }

    async fn remove_file(&mut self, file_id: FileId) -> Result<bool, StoreError> {
        Ok(self.work.files.remove(&file_id).is_some())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let Self { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn begin(&self) -> Result<Box<dyn MetadataTx>, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }

    async fn content(&self, id: ContentId) -> Result<Option<ContentBlob>, StoreError> {
        Ok(self.tables.lock().await.contents.get(&id).cloned())
    }

    async fn content_by_digest(&self, digest: &Digest) -> Result<Option<ContentBlob>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .by_digest
            .get(digest)
            .and_then(|id| tables.contents.get(id))
            .cloned())
    }

    async fn file(&self, id: FileId) -> Result<Option<FileRecord>, StoreError> {
        Ok(self.tables.lock().await.files.get(&id).cloned())
    }

    async fn files_for_owner(&self, owner: OwnerId) -> Result<Vec<FileRecord>, StoreError> {
        let tables = self.tables.lock().await;
        let mut files: Vec<FileRecord> = tables
            .files
            .values()
            .filter(|f| f.owner_id == owner)
            .cloned()
            .collect();
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(files)
    }

    async fn update_file(
        &self,
        id: FileId,
        owner: OwnerId,
        update: &FileUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<FileRecord>, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.files.get_mut(&id) {
            Some(record) if record.owner_id == owner => {
                update.apply(record, now);
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn increment_download_count(&self, id: FileId) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.files.get_mut(&id) {
            Some(record) => {
                record.download_count += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_ticket(&self, ticket: &DownloadTicket) -> Result<(), StoreError> {
        self.tables
            .lock()
            .await
            .tickets
            .insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn ticket(&self, id: TicketId) -> Result<Option<DownloadTicket>, StoreError> {
        Ok(self.tables.lock().await.tickets.get(&id).cloned())
    }

    async fn purge_expired_tickets(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let before = tables.tickets.len();
        tables.tickets.retain(|_, t| t.expires_at > now);
        Ok((before - tables.tickets.len()) as u64)
    }

    async fn storage_stats(&self) -> Result<StorageStats, StoreError> {
        let tables = self.tables.lock().await;
        let total_used = tables.contents.values().map(|c| c.size).sum();
        let original_size = tables
            .contents
            .values()
            .map(|c| c.size * c.reference_count)
            .sum();
        let owners: HashSet<OwnerId> = tables.files.values().map(|f| f.owner_id).collect();
        Ok(StorageStats::from_totals(
            total_used,
            original_size,
            count(tables.files.len()),
            count(owners.len()),
        ))
    }

    async fn owner_storage_stats(&self, owner: OwnerId) -> Result<StorageStats, StoreError> {
        let tables = self.tables.lock().await;
        let mut total_used = 0;
        let mut original_size = 0;
        let mut file_count = 0;
        for file in tables.files.values().filter(|f| f.owner_id == owner) {
            if let Some(content) = tables.contents.get(&file.content_id) {
                total_used += content.size / content.reference_count.max(1);
                original_size += content.size;
            }
            file_count += 1;
        }
        let user_count = i64::from(file_count > 0);
        Ok(StorageStats::from_totals(
            total_used,
            original_size,
            file_count,
            user_count,
        ))
    }

    async fn duplicate_contents(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<DuplicateContent>, StoreError> {
        let tables = self.tables.lock().await;
        let mut shared: Vec<&ContentBlob> = tables
            .contents
            .values()
            .filter(|c| c.reference_count > 1)
            .collect();
        shared.sort_by(|a, b| {
            b.reference_count
                .cmp(&a.reference_count)
                .then(b.size.cmp(&a.size))
        });
        Ok(shared
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .map(DuplicateContent::new)
            .collect())
    }
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
