use std::sync::Arc;
#[cfg(feature = "postgres")]
use std::time::Duration;

use tracing::info;

use vault_blob::{BlobStore, FsBlobStore};
use vault_store::MetadataStore;
use vault_store_memory::MemoryMetadataStore;
#[cfg(feature = "postgres")]
use vault_store_postgres::{PostgresConfig, PostgresMetadataStore};

use crate::config::{MetadataConfig, StorageConfig};
use crate::error::ServerError;

/// Create a metadata store from the given configuration.
///
/// SQL backends run their migrations before returning.
#[allow(clippy::unused_async)]
pub async fn create_metadata_store(
    config: &MetadataConfig,
) -> Result<Arc<dyn MetadataStore>, ServerError> {
    let store: Arc<dyn MetadataStore> = match config.backend.as_str() {
        "memory" => Arc::new(MemoryMetadataStore::new()),
        #[cfg(feature = "postgres")]
        "postgres" => {
            let url = config.url.as_deref().ok_or_else(|| {
                ServerError::Config("postgres backend requires [metadata] url".into())
            })?;

            let pg_config = PostgresConfig {
                url: url.to_owned(),
                pool_size: config.pool_size,
                acquire_timeout: Duration::from_secs(config.acquire_timeout_seconds),
                schema: config.schema.clone(),
                table_prefix: config.table_prefix.clone(),
                ssl_mode: config.ssl_mode.clone(),
                ssl_root_cert: config.ssl_root_cert.clone(),
            };

            Arc::new(PostgresMetadataStore::new(pg_config).await?)
        }
        other => {
            return Err(ServerError::Config(format!(
                "unsupported metadata backend: {other}"
            )));
        }
    };

    info!(backend = %config.backend, "metadata store initialized");
    Ok(store)
}

/// Open the blob volume, creating its root directory if needed.
pub async fn create_blob_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>, ServerError> {
    let store = FsBlobStore::new(&config.root).await?;
    info!(root = %config.root.display(), "blob store initialized");
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_is_available() {
        let store = create_metadata_store(&MetadataConfig::default()).await.unwrap();
        assert_eq!(store.storage_stats().await.unwrap().file_count, 0);
    }

    #[tokio::test]
    async fn unknown_backend_is_rejected() {
        let config = MetadataConfig {
            backend: "sqlite".into(),
            ..MetadataConfig::default()
        };
        let err = create_metadata_store(&config).await.err().unwrap();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[cfg(feature = "postgres")]
    #[tokio::test]
    async fn postgres_backend_requires_url() {
        let config = MetadataConfig {
            backend: "postgres".into(),
            ..MetadataConfig::default()
        };
        let err = create_metadata_store(&config).await.err().unwrap();
        assert!(err.to_string().contains("requires [metadata] url"));
    }

    #[tokio::test]
    async fn blob_root_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("blobs");
        let config = StorageConfig {
            root: root.clone(),
            ..StorageConfig::default()
        };
        create_blob_store(&config).await.unwrap();
        assert!(root.is_dir());
    }
}
