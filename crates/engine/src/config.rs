use std::time::Duration;

use vault_core::DEFAULT_TICKET_TTL;

/// Tunables for the coordination layer.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Largest accepted payload per uploaded file, in bytes.
    pub max_upload_bytes: u64,
    /// Lifetime of a download ticket.
    pub ticket_ttl: Duration,
    /// How often expired tickets are swept.
    pub sweep_interval: Duration,
    /// Capacity of the background job queue. Jobs beyond it are dropped.
    pub queue_capacity: usize,
    /// Retries for download-count updates that hit a transient store error.
    pub max_retries: u32,
    /// Delay between those retries.
    pub retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 100 * 1024 * 1024,
            ticket_ttl: DEFAULT_TICKET_TTL,
            sweep_interval: Duration::from_secs(30 * 60),
            queue_capacity: 1024,
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}
