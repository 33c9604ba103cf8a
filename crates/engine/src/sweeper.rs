use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use vault_core::VaultError;

use crate::vault::Vault;

/// Periodically removes expired download tickets.
#[derive(Debug, Clone)]
pub struct TicketSweeper {
    vault: Vault,
    interval: Duration,
}

impl TicketSweeper {
    /// Create a sweeper using the vault's configured sweep interval.
    pub fn new(vault: Vault) -> Self {
        let interval = vault.config().sweep_interval;
        Self { vault, interval }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run a single sweep. Returns the number of tickets removed.
    pub async fn sweep_once(&self) -> Result<u64, VaultError> {
        let removed = self.vault.sweep_expired_tickets().await?;
        if removed > 0 {
            info!(removed, "expired download tickets swept");
        } else {
            debug!("no expired download tickets");
        }
        Ok(removed)
    }

    /// Sweep on every interval tick until `shutdown` is cancelled.
    ///
    /// The first sweep runs immediately.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "ticket sweeper starting");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("ticket sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "error sweeping expired tickets");
                    }
                }
            }
        }

        info!("ticket sweeper stopped");
    }
}
