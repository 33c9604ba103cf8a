use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Run database migrations, creating required tables if they do not exist.
///
/// This creates the contents, files and tickets tables in the configured
/// schema with the configured table prefix. Every statement is idempotent.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let contents_table = config.contents_table();
    let files_table = config.files_table();
    let tickets_table = config.tickets_table();
    let prefix = &config.table_prefix;

    let create_contents = format!(
        "CREATE TABLE IF NOT EXISTS {contents_table} (
            id UUID PRIMARY KEY,
            digest TEXT NOT NULL UNIQUE,
            path TEXT NOT NULL,
            size BIGINT NOT NULL,
            mime_type TEXT NOT NULL,
            reference_count BIGINT NOT NULL DEFAULT 1 CHECK (reference_count >= 0),
            created_at TIMESTAMPTZ NOT NULL
        )"
    );

    // The content reference is checked at commit so that a delete can remove
    // the content row before the file row inside one transaction.
    let create_files = format!(
        "CREATE TABLE IF NOT EXISTS {files_table} (
            id UUID PRIMARY KEY,
            owner_id UUID NOT NULL,
            content_id UUID NOT NULL REFERENCES {contents_table} (id)
                DEFERRABLE INITIALLY DEFERRED,
            name TEXT NOT NULL,
            folder_id UUID,
            tags TEXT[] NOT NULL DEFAULT '{{}}',
            is_public BOOLEAN NOT NULL DEFAULT FALSE,
            download_count BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )"
    );

    let create_files_owner_idx = format!(
        "CREATE INDEX IF NOT EXISTS {prefix}files_owner_idx ON {files_table} (owner_id, created_at DESC)"
    );

    let create_files_content_idx = format!(
        "CREATE INDEX IF NOT EXISTS {prefix}files_content_idx ON {files_table} (content_id)"
    );

    let create_tickets = format!(
        "CREATE TABLE IF NOT EXISTS {tickets_table} (
            id UUID PRIMARY KEY,
            issuer_id UUID NOT NULL,
            owner_id UUID NOT NULL,
            file_id UUID NOT NULL,
            content_id UUID NOT NULL,
            filename TEXT NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        )"
    );

    let create_tickets_expiry_idx = format!(
        "CREATE INDEX IF NOT EXISTS {prefix}tickets_expires_at_idx ON {tickets_table} (expires_at)"
    );

    sqlx::query(&create_contents).execute(pool).await?;
    sqlx::query(&create_files).execute(pool).await?;
    sqlx::query(&create_files_owner_idx).execute(pool).await?;
    sqlx::query(&create_files_content_idx).execute(pool).await?;
    sqlx::query(&create_tickets).execute(pool).await?;
    sqlx::query(&create_tickets_expiry_idx)
        .execute(pool)
        .await?;

    Ok(())
}
