use tracing::{debug, info};

use vault_core::{
    Caller, DownloadGrant, DownloadTicket, FileId, OwnerId, TicketId, VaultError,
};

use crate::background::Job;
use crate::vault::Vault;

impl Vault {
    /// Issue a short-lived download ticket for a file.
    ///
    /// The caller must own the file or the file must be public. Anything else
    /// is reported as not found so private files cannot be probed.
    pub async fn issue_download_ticket(
        &self,
        caller: &Caller,
        file_id: FileId,
    ) -> Result<DownloadTicket, VaultError> {
        let file = self
            .store
            .file(file_id)
            .await?
            .filter(|f| f.owner_id == caller.id || f.is_public)
            .ok_or_else(|| VaultError::NotFound(format!("file {file_id}")))?;

        let ticket = DownloadTicket {
            id: TicketId::new(),
            issuer_id: caller.id,
            owner_id: file.owner_id,
            file_id: file.id,
            content_id: file.content_id,
            filename: file.name,
            expires_at: self.clock.now() + self.ticket_ttl,
        };
        self.store.insert_ticket(&ticket).await?;

        self.metrics.increment_tickets_issued();
        debug!(ticket_id = %ticket.id, file_id = %file_id, "download ticket issued");
        Ok(ticket)
    }

    /// Redeem a ticket for the blob location and download headers.
    ///
    /// Unknown, expired and foreign tickets are all not found. Downloads by
    /// anyone other than the owner are counted in the background.
    pub async fn consume_download_ticket(
        &self,
        ticket_id: TicketId,
        claimant: OwnerId,
    ) -> Result<DownloadGrant, VaultError> {
        let now = self.clock.now();
        let ticket = self
            .store
            .ticket(ticket_id)
            .await?
            .filter(|t| t.issuer_id == claimant && t.is_valid_at(now))
            .ok_or_else(|| VaultError::NotFound(format!("ticket {ticket_id}")))?;

        let content = self
            .store
            .content(ticket.content_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("content {}", ticket.content_id)))?;

        if claimant != ticket.owner_id {
            self.background.enqueue(Job::CountDownload {
                file_id: ticket.file_id,
            });
        }

        self.metrics.increment_tickets_redeemed();
        info!(ticket_id = %ticket_id, file_id = %ticket.file_id, "download ticket redeemed");
        Ok(DownloadGrant {
            file_id: ticket.file_id,
            path: content.path,
            filename: ticket.filename,
            mime_type: content.mime_type,
            size: content.size,
        })
    }

    /// Remove every ticket that has expired by now.
    pub async fn sweep_expired_tickets(&self) -> Result<u64, VaultError> {
        let removed = self.store.purge_expired_tickets(self.clock.now()).await?;
        self.metrics.add_tickets_swept(removed);
        Ok(removed)
    }
}
