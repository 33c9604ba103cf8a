use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ContentId;

/// Lowercase hex rendering of a `SHA-256` content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Length of a hex-encoded `SHA-256` digest.
    pub const HEX_LEN: usize = 64;

    /// Wrap a hex digest, normalizing it to lowercase.
    ///
    /// Returns `None` unless `hex` is exactly 64 hex characters.
    pub fn parse(hex: &str) -> Option<Self> {
        if hex.len() == Self::HEX_LEN && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(hex.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Wrap a digest produced by a trusted hasher without validating it.
    pub fn from_trusted(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character shard prefix used to spread blobs across directories.
    pub fn shard(&self) -> &str {
        self.0.get(..2).unwrap_or("00")
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A physically stored, deduplicated byte sequence shared by file records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlob {
    pub id: ContentId,
    pub digest: Digest,
    /// Location of the blob on the storage volume.
    pub path: String,
    pub size: i64,
    pub mime_type: String,
    /// Number of live file records pointing at this content. Never negative.
    pub reference_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Input to the catalog's register-or-increment operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContent {
    pub digest: Digest,
    pub path: String,
    pub size: i64,
    pub mime_type: String,
}
