pub mod caller;
pub mod clock;
pub mod content;
pub mod error;
pub mod file;
pub mod ratelimit;
pub mod sanitize;
pub mod stats;
pub mod ticket;
pub mod types;

pub use caller::{Caller, Role};
pub use clock::{Clock, ManualClock, SystemClock};
pub use content::{ContentBlob, Digest, NewContent};
pub use error::{ErrorKind, VaultError};
pub use file::{FileRecord, FileUpdate, NewFileRecord};
pub use ratelimit::{MemoryRateGate, RateDecision, RateGate};
pub use sanitize::{sanitize_filename, sanitize_mime_type};
pub use stats::{DuplicateContent, StorageStats};
pub use ticket::{DEFAULT_TICKET_TTL, DownloadGrant, DownloadTicket};
pub use types::{ContentId, FileId, FolderId, OwnerId, TicketId};
