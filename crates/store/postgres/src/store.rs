use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use vault_core::{
    ContentBlob, ContentId, Digest, DownloadTicket, DuplicateContent, FileId, FileRecord,
    FileUpdate, FolderId, NewContent, NewFileRecord, OwnerId, StorageStats, TicketId,
};
use vault_store::error::StoreError;
use vault_store::store::{MetadataStore, MetadataTx, RegisteredContent};

use crate::config::PostgresConfig;
use crate::migrations;

const CONTENT_COLUMNS: &str = "id, digest, path, size, mime_type, reference_count, created_at";
const FILE_COLUMNS: &str = "id, owner_id, content_id, name, folder_id, tags, is_public, \
                            download_count, created_at, updated_at";
const TICKET_COLUMNS: &str = "id, issuer_id, owner_id, file_id, content_id, filename, expires_at";

/// SQLSTATE codes that indicate the statement may succeed on retry:
/// serialization failure, deadlock, lock not available, query canceled.
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01", "55P03", "57014"];

/// Translate a `sqlx` error into a [`StoreError`], separating retryable
/// failures from hard ones.
fn map_sqlx_err(e: sqlx::Error, config: &PostgresConfig) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut => StoreError::Timeout(config.acquire_timeout),
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::Tls(_) => {
            StoreError::Connection(e.to_string())
        }
        sqlx::Error::Database(ref db) => {
            let code = db.code();
            match code.as_deref() {
                Some(c) if TRANSIENT_SQLSTATES.contains(&c) => StoreError::Transient(e.to_string()),
                // check_violation: reference_count >= 0
                Some("23514") => StoreError::Conflict(e.to_string()),
                _ => StoreError::Backend(e.to_string()),
            }
        }
        other => StoreError::Backend(other.to_string()),
    }
}

/// Build `PgConnectOptions` from a [`PostgresConfig`], applying SSL settings
/// when configured.
pub(crate) fn build_connect_options(
    config: &PostgresConfig,
) -> Result<sqlx::postgres::PgConnectOptions, StoreError> {
    let mut options: sqlx::postgres::PgConnectOptions = config
        .url
        .parse()
        .map_err(|e: sqlx::Error| StoreError::Connection(e.to_string()))?;

    if let Some(ref mode) = config.ssl_mode {
        let ssl_mode = match mode.as_str() {
            "disable" => sqlx::postgres::PgSslMode::Disable,
            "prefer" => sqlx::postgres::PgSslMode::Prefer,
            "require" => sqlx::postgres::PgSslMode::Require,
            "verify-ca" => sqlx::postgres::PgSslMode::VerifyCa,
            "verify-full" => sqlx::postgres::PgSslMode::VerifyFull,
            other => {
                return Err(StoreError::Connection(format!("unknown ssl_mode: {other}")));
            }
        };
        options = options.ssl_mode(ssl_mode);
    }

    if let Some(ref path) = config.ssl_root_cert {
        options = options.ssl_root_cert(path);
    }

    Ok(options)
}

/// Internal row type for the contents table.
#[derive(sqlx::FromRow)]
struct ContentRow {
    id: Uuid,
    digest: String,
    path: String,
    size: i64,
    mime_type: String,
    reference_count: i64,
    created_at: DateTime<Utc>,
}

impl From<ContentRow> for ContentBlob {
    fn from(row: ContentRow) -> Self {
        Self {
            id: ContentId::from_uuid(row.id),
            digest: Digest::from_trusted(row.digest),
            path: row.path,
            size: row.size,
            mime_type: row.mime_type,
            reference_count: row.reference_count,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UpsertRow {
    #[sqlx(flatten)]
    content: ContentRow,
    inserted: bool,
}

/// Internal row type for the files table.
#[derive(sqlx::FromRow)]
struct FileRow {
    id: Uuid,
    owner_id: Uuid,
    content_id: Uuid,
    name: String,
    folder_id: Option<Uuid>,
    tags: Vec<String>,
    is_public: bool,
    download_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<FileRow> for FileRecord {
    fn from(row: FileRow) -> Self {
        Self {
            id: FileId::from_uuid(row.id),
            owner_id: OwnerId::from_uuid(row.owner_id),
            content_id: ContentId::from_uuid(row.content_id),
            name: row.name,
            folder_id: row.folder_id.map(Into::into),
            tags: row.tags,
            is_public: row.is_public,
            download_count: row.download_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Internal row type for the tickets table.
#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    issuer_id: Uuid,
    owner_id: Uuid,
    file_id: Uuid,
    content_id: Uuid,
    filename: String,
    expires_at: DateTime<Utc>,
}

impl From<TicketRow> for DownloadTicket {
    fn from(row: TicketRow) -> Self {
        Self {
            id: TicketId::from_uuid(row.id),
            issuer_id: OwnerId::from_uuid(row.issuer_id),
            owner_id: OwnerId::from_uuid(row.owner_id),
            file_id: FileId::from_uuid(row.file_id),
            content_id: ContentId::from_uuid(row.content_id),
            filename: row.filename,
            expires_at: row.expires_at,
        }
    }
}

/// PostgreSQL-backed implementation of [`MetadataStore`].
///
/// Reference counting relies on `INSERT ... ON CONFLICT DO UPDATE` for
/// registration and on `SELECT ... FOR UPDATE` row locks for decrement and
/// reclaim, so any number of processes may share one database. Registration
/// and [`MetadataTx::lock_digest`] also take a per-digest advisory lock, which
/// orders blob removal against uploads whose rows are not yet visible.
pub struct PostgresMetadataStore {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresMetadataStore {
    /// Create a new `PostgresMetadataStore` from the provided configuration.
    ///
    /// Connects to `PostgreSQL`, creates the connection pool, and runs
    /// migrations to ensure the required tables exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if pool creation fails, or
    /// [`StoreError::Backend`] if migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, StoreError> {
        let pool = connect(&config).await?;
        Self::from_pool(pool, config).await
    }

    /// Create a `PostgresMetadataStore` from an existing pool and config.
    ///
    /// Runs migrations on creation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if migrations fail.
    pub async fn from_pool(pool: PgPool, config: PostgresConfig) -> Result<Self, StoreError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        debug!(
            schema = %config.schema,
            table_prefix = %config.table_prefix,
            "postgres metadata store ready"
        );
        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    fn err(&self, e: sqlx::Error) -> StoreError {
        map_sqlx_err(e, &self.config)
    }
}

/// Open a connection pool for `config` without running migrations.
///
/// # Errors
///
/// Returns [`StoreError::Connection`] if the URL is invalid or the pool
/// cannot connect.
pub async fn connect(config: &PostgresConfig) -> Result<PgPool, StoreError> {
    let connect_options = build_connect_options(config)?;
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))
}

/// A metadata transaction over a pooled `PostgreSQL` connection.
///
/// `sqlx` rolls the transaction back when it is dropped uncommitted.
struct PostgresTx {
    tx: Transaction<'static, Postgres>,
    config: Arc<PostgresConfig>,
}

impl PostgresTx {
    fn err(&self, e: sqlx::Error) -> StoreError {
        map_sqlx_err(e, &self.config)
    }

    /// Take the transaction-scoped advisory lock for `digest`.
    ///
    /// Held until commit or rollback. Hash collisions only over-serialize.
    async fn lock_digest_key(&mut self, digest: &Digest) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(digest.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| self.err(e))?;
        Ok(())
    }
}

#[async_trait]
impl MetadataTx for PostgresTx {
    async fn register_or_increment(
        &mut self,
        content: &NewContent,
        now: DateTime<Utc>,
    ) -> Result<RegisteredContent, StoreError> {
        self.lock_digest_key(&content.digest).await?;

        let table = self.config.contents_table();
        // xmax is zero only for a freshly inserted tuple.
        let query = format!(
            "INSERT INTO {table} (id, digest, path, size, mime_type, reference_count, created_at) \
             VALUES ($1, $2, $3, $4, $5, 1, $6) \
             ON CONFLICT (digest) DO UPDATE \
             SET reference_count = {table}.reference_count + 1 \
             RETURNING {CONTENT_COLUMNS}, (xmax = 0) AS inserted"
        );

        let row: UpsertRow = sqlx::query_as(&query)
            .bind(ContentId::new().as_uuid())
            .bind(content.digest.as_str())
            .bind(&content.path)
            .bind(content.size)
            .bind(&content.mime_type)
            .bind(now)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| self.err(e))?;

        Ok(RegisteredContent {
            content: row.content.into(),
            inserted: row.inserted,
        })
    }

    async fn lock_digest(&mut self, digest: &Digest) -> Result<Option<ContentBlob>, StoreError> {
        self.lock_digest_key(digest).await?;

        let table = self.config.contents_table();
        let query = format!("SELECT {CONTENT_COLUMNS} FROM {table} WHERE digest = $1");
        let row: Option<ContentRow> = sqlx::query_as(&query)
            .bind(digest.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| self.err(e))?;

        Ok(row.map(Into::into))
    }

    async fn decrement(&mut self, content_id: ContentId) -> Result<i64, StoreError> {
        let table = self.config.contents_table();

        let lock = format!("SELECT reference_count FROM {table} WHERE id = $1 FOR UPDATE");
        let current: Option<(i64,)> = sqlx::query_as(&lock)
            .bind(content_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| self.err(e))?;

        match current {
            None => return Err(StoreError::NotFound(format!("content {content_id}"))),
            Some((count,)) if count <= 0 => {
                return Err(StoreError::Conflict(format!(
                    "content {content_id} already has reference count {count}"
                )));
            }
            Some(_) => {}
        }

        let update = format!(
            "UPDATE {table} SET reference_count = reference_count - 1 \
             WHERE id = $1 RETURNING reference_count"
        );
        let (remaining,): (i64,) = sqlx::query_as(&update)
            .bind(content_id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| self.err(e))?;

        Ok(remaining)
    }

    async fn reclaim(&mut self, content_id: ContentId) -> Result<ContentBlob, StoreError> {
        let table = self.config.contents_table();
        let query = format!(
            "DELETE FROM {table} WHERE id = $1 AND reference_count <= 0 \
             RETURNING {CONTENT_COLUMNS}"
        );

        let row: Option<ContentRow> = sqlx::query_as(&query)
            .bind(content_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| self.err(e))?;

        if let Some(row) = row {
            return Ok(row.into());
        }

        let exists = format!("SELECT 1 FROM {table} WHERE id = $1");
        let still_there: Option<(i32,)> = sqlx::query_as(&exists)
            .bind(content_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| self.err(e))?;

        Err(if still_there.is_some() {
            StoreError::Conflict(format!("content {content_id} is still referenced"))
        } else {
            StoreError::NotFound(format!("content {content_id}"))
        })
    }

    async fn insert_file(&mut self, file: NewFileRecord) -> Result<FileRecord, StoreError> {
        let table = self.config.files_table();
        let query = format!(
            "INSERT INTO {table} (id, owner_id, content_id, name, folder_id, tags, is_public, \
                                  download_count, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $8) \
             RETURNING {FILE_COLUMNS}"
        );

        let row: FileRow = sqlx::query_as(&query)
            .bind(file.id.as_uuid())
            .bind(file.owner_id.as_uuid())
            .bind(file.content_id.as_uuid())
            .bind(&file.name)
            .bind(file.folder_id.map(FolderId::as_uuid))
            .bind(&file.tags)
            .bind(file.is_public)
            .bind(file.created_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| self.err(e))?;

        Ok(row.into())
    }

    async fn lock_file(&mut self, file_id: FileId) -> Result<Option<FileRecord>, StoreError> {
        let table = self.config.files_table();
        let query = format!("SELECT {FILE_COLUMNS} FROM {table} WHERE id = $1 FOR UPDATE");

        let row: Option<FileRow> = sqlx::query_as(&query)
            .bind(file_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| self.err(e))?;

        Ok(row.map(Into::into))
    }

    async fn remove_file(&mut self, file_id: FileId) -> Result<bool, StoreError> {
        let table = self.config.files_table();
        let query = format!("DELETE FROM {table} WHERE id = $1");

        let result = sqlx::query(&query)
            .bind(file_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| self.err(e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let config = Arc::clone(&self.config);
        self.tx.commit().await.map_err(|e| map_sqlx_err(e, &config))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let config = Arc::clone(&self.config);
        self.tx.rollback().await.map_err(|e| map_sqlx_err(e, &config))
    }
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    async fn begin(&self) -> Result<Box<dyn MetadataTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(|e| self.err(e))?;
        Ok(Box::new(PostgresTx {
            tx,
            config: Arc::clone(&self.config),
        }))
    }

    async fn content(&self, id: ContentId) -> Result<Option<ContentBlob>, StoreError> {
        let table = self.config.contents_table();
        let query = format!("SELECT {CONTENT_COLUMNS} FROM {table} WHERE id = $1");

        let row: Option<ContentRow> = sqlx::query_as(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.err(e))?;

        Ok(row.map(Into::into))
    }

    async fn content_by_digest(&self, digest: &Digest) -> Result<Option<ContentBlob>, StoreError> {
        let table = self.config.contents_table();
        let query = format!("SELECT {CONTENT_COLUMNS} FROM {table} WHERE digest = $1");

        let row: Option<ContentRow> = sqlx::query_as(&query)
            .bind(digest.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.err(e))?;

        Ok(row.map(Into::into))
    }

    async fn file(&self, id: FileId) -> Result<Option<FileRecord>, StoreError> {
        let table = self.config.files_table();
        let query = format!("SELECT {FILE_COLUMNS} FROM {table} WHERE id = $1");

        let row: Option<FileRow> = sqlx::query_as(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.err(e))?;

        Ok(row.map(Into::into))
    }

    async fn files_for_owner(&self, owner: OwnerId) -> Result<Vec<FileRecord>, StoreError> {
        let table = self.config.files_table();
        let query = format!(
            "SELECT {FILE_COLUMNS} FROM {table} WHERE owner_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );

        let rows: Vec<FileRow> = sqlx::query_as(&query)
            .bind(owner.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.err(e))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_file(
        &self,
        id: FileId,
        owner: OwnerId,
        update: &FileUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<FileRecord>, StoreError> {
        let table = self.config.files_table();
        let mut tx = self.pool.begin().await.map_err(|e| self.err(e))?;

        let select = format!(
            "SELECT {FILE_COLUMNS} FROM {table} WHERE id = $1 AND owner_id = $2 FOR UPDATE"
        );
        let row: Option<FileRow> = sqlx::query_as(&select)
            .bind(id.as_uuid())
            .bind(owner.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| self.err(e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut record: FileRecord = row.into();
        update.apply(&mut record, now);

        let write = format!(
            "UPDATE {table} SET name = $2, tags = $3, is_public = $4, folder_id = $5, \
             updated_at = $6 WHERE id = $1"
        );
        sqlx::query(&write)
            .bind(record.id.as_uuid())
            .bind(&record.name)
            .bind(&record.tags)
            .bind(record.is_public)
            .bind(record.folder_id.map(FolderId::as_uuid))
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| self.err(e))?;

        tx.commit().await.map_err(|e| self.err(e))?;
        Ok(Some(record))
    }

    async fn increment_download_count(&self, id: FileId) -> Result<bool, StoreError> {
        let table = self.config.files_table();
        let query = format!("UPDATE {table} SET download_count = download_count + 1 WHERE id = $1");

        let result = sqlx::query(&query)
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| self.err(e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_ticket(&self, ticket: &DownloadTicket) -> Result<(), StoreError> {
        let table = self.config.tickets_table();
        let query = format!(
            "INSERT INTO {table} ({TICKET_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        );

        sqlx::query(&query)
            .bind(ticket.id.as_uuid())
            .bind(ticket.issuer_id.as_uuid())
            .bind(ticket.owner_id.as_uuid())
            .bind(ticket.file_id.as_uuid())
            .bind(ticket.content_id.as_uuid())
            .bind(&ticket.filename)
            .bind(ticket.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| self.err(e))?;

        Ok(())
    }

    async fn ticket(&self, id: TicketId) -> Result<Option<DownloadTicket>, StoreError> {
        let table = self.config.tickets_table();
        let query = format!("SELECT {TICKET_COLUMNS} FROM {table} WHERE id = $1");

        let row: Option<TicketRow> = sqlx::query_as(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.err(e))?;

        Ok(row.map(Into::into))
    }

    async fn purge_expired_tickets(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let table = self.config.tickets_table();
        let query = format!("DELETE FROM {table} WHERE expires_at <= $1");

        let result = sqlx::query(&query)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| self.err(e))?;

        Ok(result.rows_affected())
    }

    async fn storage_stats(&self) -> Result<StorageStats, StoreError> {
        let contents = self.config.contents_table();
        let files = self.config.files_table();

        let sizes = format!(
            "SELECT COALESCE(SUM(size), 0)::BIGINT, \
                    COALESCE(SUM(size * reference_count), 0)::BIGINT \
             FROM {contents}"
        );
        let (total_used, original_size): (i64, i64) = sqlx::query_as(&sizes)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.err(e))?;

        let counts = format!("SELECT COUNT(*), COUNT(DISTINCT owner_id) FROM {files}");
        let (file_count, user_count): (i64, i64) = sqlx::query_as(&counts)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.err(e))?;

        Ok(StorageStats::from_totals(
            total_used,
            original_size,
            file_count,
            user_count,
        ))
    }

    async fn owner_storage_stats(&self, owner: OwnerId) -> Result<StorageStats, StoreError> {
        let contents = self.config.contents_table();
        let files = self.config.files_table();
        let query = format!(
            "SELECT COALESCE(SUM(c.size / GREATEST(c.reference_count, 1)), 0)::BIGINT, \
                    COALESCE(SUM(c.size), 0)::BIGINT, \
                    COUNT(f.id) \
             FROM {files} f JOIN {contents} c ON c.id = f.content_id \
             WHERE f.owner_id = $1"
        );

        let (total_used, original_size, file_count): (i64, i64, i64) = sqlx::query_as(&query)
            .bind(owner.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.err(e))?;

        Ok(StorageStats::from_totals(
            total_used,
            original_size,
            file_count,
            i64::from(file_count > 0),
        ))
    }

    async fn duplicate_contents(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<DuplicateContent>, StoreError> {
        let table = self.config.contents_table();
        let query = format!(
            "SELECT {CONTENT_COLUMNS} FROM {table} WHERE reference_count > 1 \
             ORDER BY reference_count DESC, size DESC LIMIT $1 OFFSET $2"
        );

        let rows: Vec<ContentRow> = sqlx::query_as(&query)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.err(e))?;

        Ok(rows
            .into_iter()
            .map(|row| DuplicateContent::new(row.into()))
            .collect())
    }
}


#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    fn test_config() -> PostgresConfig {
        PostgresConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/vault_test".to_string()),
            table_prefix: format!("test_{}_", uuid::Uuid::new_v4().simple()),
            ..PostgresConfig::default()
        }
    }

    #[tokio::test]
    async fn store_conformance() {
        let config = test_config();
        let store = PostgresMetadataStore::new(config)
            .await
            .expect("pool creation should succeed");
        vault_store::testing::run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn digest_lock_waits_for_uncommitted_registration() {
        let store = Arc::new(
            PostgresMetadataStore::new(test_config())
                .await
                .expect("pool creation should succeed"),
        );
        let digest = Digest::from_trusted(format!("{:064x}", uuid::Uuid::new_v4().as_u128()));
        let content = NewContent {
            digest: digest.clone(),
            path: format!("/blobs/{}/{digest}.txt", digest.shard()),
            size: 3,
            mime_type: "text/plain".into(),
        };

        let mut writer = store.begin().await.expect("begin");
        writer
            .register_or_increment(&content, Utc::now())
            .await
            .expect("register");

        let reader_store = Arc::clone(&store);
        let reader_digest = digest.clone();
        let mut reader = tokio::spawn(async move {
            let mut tx = reader_store.begin().await?;
            let row = tx.lock_digest(&reader_digest).await?;
            tx.rollback().await?;
            Ok::<_, StoreError>(row)
        });

        let waited = tokio::time::timeout(std::time::Duration::from_millis(200), &mut reader).await;
        assert!(waited.is_err(), "lock should wait for the open registration");

        writer.commit().await.expect("commit");
        let row = reader
            .await
            .expect("reader task")
            .expect("lock_digest should succeed");
        assert_eq!(row.map(|c| c.path), Some(content.path));
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let config = test_config();
        let pool = connect(&config).await.expect("pool creation should succeed");
        migrations::run_migrations(&pool, &config)
            .await
            .expect("first migration should succeed");
        migrations::run_migrations(&pool, &config)
            .await
            .expect("second migration should succeed");
    }
}
