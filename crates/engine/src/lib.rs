//! Coordination layer of the deduplicating store.
//!
//! The [`Vault`] facade ties a [`MetadataStore`](vault_store::MetadataStore)
//! and a [`BlobStore`](vault_blob::BlobStore) together: uploads write a blob
//! before registering it, deletes decrement and reclaim under a row lock, and
//! blob removal plus download counting run on a bounded background queue.

pub mod background;
pub mod builder;
pub mod config;
pub mod delete;
pub mod metrics;
pub mod sweeper;
pub mod ticket;
pub mod upload;
pub mod vault;

pub use background::{BackgroundHandle, BackgroundWorker, Job};
pub use builder::VaultBuilder;
pub use config::EngineConfig;
pub use delete::DeleteOutcome;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use sweeper::TicketSweeper;
pub use upload::UploadItem;
pub use vault::Vault;
