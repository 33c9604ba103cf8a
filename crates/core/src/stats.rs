use serde::{Deserialize, Serialize};

use crate::content::ContentBlob;

/// Deduplication savings over a set of contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    /// Bytes physically stored.
    pub total_used: i64,
    /// Bytes that would be stored without deduplication.
    pub original_size: i64,
    pub saved_bytes: i64,
    pub saved_percentage: f64,
    pub file_count: i64,
    pub user_count: i64,
}

impl StorageStats {
    /// Derive savings from raw totals.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_totals(total_used: i64, original_size: i64, file_count: i64, user_count: i64) -> Self {
        let saved_bytes = (original_size - total_used).max(0);
        let saved_percentage = if original_size > 0 {
            saved_bytes as f64 / original_size as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total_used,
            original_size,
            saved_bytes,
            saved_percentage,
            file_count,
            user_count,
        }
    }
}

/// A content blob referenced by more than one file record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateContent {
    pub content: ContentBlob,
    /// Bytes avoided by sharing: `size * (reference_count - 1)`.
    pub saved_bytes: i64,
}

impl DuplicateContent {
    pub fn new(content: ContentBlob) -> Self {
        let saved_bytes = content.size * (content.reference_count - 1).max(0);
        Self {
            content,
            saved_bytes,
        }
    }
}
