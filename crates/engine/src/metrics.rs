use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters tracking engine outcomes.
///
/// All counters use relaxed ordering. For a consistent point-in-time view,
/// call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Files successfully uploaded.
    pub uploads: AtomicU64,
    /// Uploads that reused an existing content blob.
    pub deduplicated: AtomicU64,
    /// Upload items that failed.
    pub upload_failures: AtomicU64,
    /// Files deleted.
    pub deletes: AtomicU64,
    /// Content rows reclaimed because their last reference went away.
    pub reclaimed: AtomicU64,
    /// Blobs physically removed by the background worker.
    pub blobs_deleted: AtomicU64,
    /// Background blob deletions that failed.
    pub blob_delete_failures: AtomicU64,
    /// Download tickets issued.
    pub tickets_issued: AtomicU64,
    /// Download tickets redeemed.
    pub tickets_redeemed: AtomicU64,
    /// Expired tickets removed by the sweeper.
    pub tickets_swept: AtomicU64,
    /// Download-count increments applied.
    pub downloads_counted: AtomicU64,
    /// Background jobs dropped because the queue was full or closed.
    pub jobs_dropped: AtomicU64,
}

impl EngineMetrics {
    /// Increment the uploads counter.
    pub fn increment_uploads(&self) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the deduplicated counter.
    pub fn increment_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the upload failures counter.
    pub fn increment_upload_failures(&self) {
        self.upload_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the deletes counter.
    pub fn increment_deletes(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the reclaimed counter.
    pub fn increment_reclaimed(&self) {
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the blobs deleted counter.
    pub fn increment_blobs_deleted(&self) {
        self.blobs_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the blob delete failures counter.
    pub fn increment_blob_delete_failures(&self) {
        self.blob_delete_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the tickets issued counter.
    pub fn increment_tickets_issued(&self) {
        self.tickets_issued.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the tickets redeemed counter.
    pub fn increment_tickets_redeemed(&self) {
        self.tickets_redeemed.fetch_add(1, Ordering::Relaxed);
    }

    /// Add to the tickets swept counter.
    pub fn add_tickets_swept(&self, n: u64) {
        self.tickets_swept.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment the downloads counted counter.
    pub fn increment_downloads_counted(&self) {
        self.downloads_counted.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the dropped jobs counter.
    pub fn increment_jobs_dropped(&self) {
        self.jobs_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uploads: self.uploads.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            upload_failures: self.upload_failures.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            blobs_deleted: self.blobs_deleted.load(Ordering::Relaxed),
            blob_delete_failures: self.blob_delete_failures.load(Ordering::Relaxed),
            tickets_issued: self.tickets_issued.load(Ordering::Relaxed),
            tickets_redeemed: self.tickets_redeemed.load(Ordering::Relaxed),
            tickets_swept: self.tickets_swept.load(Ordering::Relaxed),
            downloads_counted: self.downloads_counted.load(Ordering::Relaxed),
            jobs_dropped: self.jobs_dropped.load(Ordering::Relaxed),
        }
    }
}

/// A plain-data snapshot of [`EngineMetrics`] at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uploads: u64,
    pub deduplicated: u64,
    pub upload_failures: u64,
    pub deletes: u64,
    pub reclaimed: u64,
    pub blobs_deleted: u64,
    pub blob_delete_failures: u64,
    pub tickets_issued: u64,
    pub tickets_redeemed: u64,
    pub tickets_swept: u64,
    pub downloads_counted: u64,
    pub jobs_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let m = EngineMetrics::default();
        m.increment_uploads();
        m.increment_uploads();
        m.increment_deduplicated();
        m.add_tickets_swept(5);
        let snap = m.snapshot();
        assert_eq!(snap.uploads, 2);
        assert_eq!(snap.deduplicated, 1);
        assert_eq!(snap.tickets_swept, 5);
        assert_eq!(snap.deletes, 0);
    }
}
