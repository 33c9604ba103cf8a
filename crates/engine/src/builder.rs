use std::sync::Arc;

use chrono::TimeDelta;
use tokio_util::task::TaskTracker;

use vault_blob::BlobStore;
use vault_core::{Clock, SystemClock, VaultError};
use vault_store::MetadataStore;

use crate::background::{self, BackgroundWorker};
use crate::config::EngineConfig;
use crate::metrics::EngineMetrics;
use crate::vault::Vault;

/// Fluent builder for a [`Vault`] and its [`BackgroundWorker`].
///
/// A [`MetadataStore`] and a [`BlobStore`] must be supplied. The clock
/// defaults to the system clock and the configuration to
/// [`EngineConfig::default`].
pub struct VaultBuilder {
    store: Option<Arc<dyn MetadataStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    clock: Option<Arc<dyn Clock>>,
    config: EngineConfig,
}

impl VaultBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            blobs: None,
            clock: None,
            config: EngineConfig::default(),
        }
    }

    #[must_use]
    pub fn metadata_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Use a custom time source, typically a
    /// [`ManualClock`](vault_core::ManualClock) in tests.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the vault.
    ///
    /// The returned worker must be spawned for blob removal and download
    /// counting to happen; until it runs, jobs accumulate in the queue.
    pub fn build(self) -> Result<(Vault, BackgroundWorker), VaultError> {
        let store = self
            .store
            .ok_or_else(|| VaultError::Internal("metadata store is required".into()))?;
        let blobs = self
            .blobs
            .ok_or_else(|| VaultError::Internal("blob store is required".into()))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let ticket_ttl = TimeDelta::from_std(self.config.ticket_ttl)
            .map_err(|_| VaultError::Validation("ticket TTL is out of range".into()))?;
        if ticket_ttl <= TimeDelta::zero() {
            return Err(VaultError::Validation("ticket TTL must be positive".into()));
        }

        let metrics = Arc::new(EngineMetrics::default());
        let (handle, worker) = background::channel(
            &self.config,
            Arc::clone(&store),
            Arc::clone(&blobs),
            Arc::clone(&metrics),
        );

        let vault = Vault {
            store,
            blobs,
            clock,
            config: self.config,
            ticket_ttl,
            metrics,
            background: handle,
            uploads: TaskTracker::new(),
        };
        Ok((vault, worker))
    }
}

impl Default for VaultBuilder {
    fn default() -> Self {
        Self::new()
    }
}
