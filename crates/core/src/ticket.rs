use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ContentId, FileId, OwnerId, TicketId};

/// How long a download ticket stays valid unless configured otherwise.
pub const DEFAULT_TICKET_TTL: Duration = Duration::from_secs(60 * 60);

/// A short-lived capability to stream one file's bytes.
///
/// Tickets are immutable once issued and only disappear through the
/// periodic sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTicket {
    pub id: TicketId,
    /// Identity that requested the ticket; only it may redeem it.
    pub issuer_id: OwnerId,
    /// Owner of the file at issue time.
    pub owner_id: OwnerId,
    pub file_id: FileId,
    pub content_id: ContentId,
    /// File name captured at issue time.
    pub filename: String,
    pub expires_at: DateTime<Utc>,
}

impl DownloadTicket {
    /// A ticket is live strictly before its expiry instant.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Relative URL under which the routing layer serves this ticket.
    pub fn download_path(&self) -> String {
        format!("/api/files/{}/download/{}", self.id, self.issuer_id)
    }
}

/// Everything needed to stream a redeemed ticket back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadGrant {
    pub file_id: FileId,
    pub path: String,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
}
