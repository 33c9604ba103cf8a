use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ContentId, FileId, FolderId, OwnerId};

/// One owner's named reference to a shared content blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub owner_id: OwnerId,
    pub content_id: ContentId,
    /// Sanitized display name.
    pub name: String,
    pub folder_id: Option<FolderId>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub is_public: bool,
    pub download_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to bind a new file record to registered content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileRecord {
    pub id: FileId,
    pub owner_id: OwnerId,
    pub content_id: ContentId,
    pub name: String,
    pub folder_id: Option<FolderId>,
    pub tags: Vec<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

impl NewFileRecord {
    /// Build the record that the registry will persist.
    pub fn into_record(self) -> FileRecord {
        FileRecord {
            id: self.id,
            owner_id: self.owner_id,
            content_id: self.content_id,
            name: self.name,
            folder_id: self.folder_id,
            tags: self.tags,
            is_public: self.is_public,
            download_count: 0,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// Partial update of a file's mutable attributes.
///
/// `folder_id` uses a nested option: `Some(None)` moves the file to the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpdate {
    pub name: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_public: Option<bool>,
    pub folder_id: Option<Option<FolderId>>,
}

impl FileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.tags.is_none()
            && self.is_public.is_none()
            && self.folder_id.is_none()
    }

    /// Apply the update to a record in place.
    pub fn apply(&self, record: &mut FileRecord, now: DateTime<Utc>) {
        if let Some(ref name) = self.name {
            record.name.clone_from(name);
        }
        if let Some(ref tags) = self.tags {
            record.tags.clone_from(tags);
        }
        if let Some(is_public) = self.is_public {
            record.is_public = is_public;
        }
        if let Some(folder_id) = self.folder_id {
            record.folder_id = folder_id;
        }
        record.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileRecord {
        NewFileRecord {
            id: FileId::new(),
            owner_id: OwnerId::new(),
            content_id: ContentId::new(),
            name: "a.txt".into(),
            folder_id: Some(FolderId::new()),
            tags: vec![],
            is_public: false,
            created_at: Utc::now(),
        }
        .into_record()
    }

    #[test]
    fn new_record_starts_with_zero_downloads() {
        let record = sample();
        assert_eq!(record.download_count, 0);
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn update_applies_only_present_fields() {
        let mut record = sample();
        let before = record.clone();
        let later = before.created_at + chrono::Duration::seconds(5);
        let update = FileUpdate {
            is_public: Some(true),
            folder_id: Some(None),
            ..FileUpdate::default()
        };
        assert!(!update.is_empty());
        update.apply(&mut record, later);

        assert_eq!(record.name, before.name);
        assert!(record.is_public);
        assert!(record.folder_id.is_none());
        assert_eq!(record.updated_at, later);
        assert_eq!(record.content_id, before.content_id);
    }

    #[test]
    fn default_update_is_empty() {
        assert!(FileUpdate::default().is_empty());
    }
}
