use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vault_blob::BlobStore;
use vault_core::{Digest, FileId};
use vault_store::MetadataStore;

use crate::config::EngineConfig;
use crate::metrics::EngineMetrics;

/// Work deferred off the request path.
#[derive(Debug)]
pub enum Job {
    /// Remove a blob whose content row was reclaimed, or that lost an upload race.
    DeleteBlob { digest: Digest, path: String },
    /// Add one to a file's download counter.
    CountDownload { file_id: FileId },
    /// Resolve once every job queued before it has been processed.
    Flush(oneshot::Sender<()>),
}

impl Job {
    fn name(&self) -> &'static str {
        match self {
            Self::DeleteBlob { .. } => "delete_blob",
            Self::CountDownload { .. } => "count_download",
            Self::Flush(_) => "flush",
        }
    }
}

/// Cloneable sender side of the background queue.
#[derive(Debug, Clone)]
pub struct BackgroundHandle {
    tx: mpsc::Sender<Job>,
    metrics: Arc<EngineMetrics>,
}

impl BackgroundHandle {
    /// Queue a job without waiting.
    ///
    /// When the queue is full or the worker has stopped the job is dropped
    /// and logged. Returns whether the job was queued.
    pub fn enqueue(&self, job: Job) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(job = job.name(), "background queue full, dropping job");
                self.metrics.increment_jobs_dropped();
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(job = job.name(), "background worker stopped, dropping job");
                self.metrics.increment_jobs_dropped();
                false
            }
        }
    }

    /// Wait until every job queued so far has been processed.
    ///
    /// Returns immediately if the worker is gone.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Job::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Consumes [`Job`]s: deletes released blobs and applies download counts.
pub struct BackgroundWorker {
    rx: mpsc::Receiver<Job>,
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    metrics: Arc<EngineMetrics>,
    max_retries: u32,
    retry_backoff: Duration,
}

impl std::fmt::Debug for BackgroundWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundWorker")
            .field("max_retries", &self.max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .finish_non_exhaustive()
    }
}

/// Create a bounded job queue and the worker that drains it.
pub fn channel(
    config: &EngineConfig,
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    metrics: Arc<EngineMetrics>,
) -> (BackgroundHandle, BackgroundWorker) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let handle = BackgroundHandle {
        tx,
        metrics: Arc::clone(&metrics),
    };
    let worker = BackgroundWorker {
        rx,
        store,
        blobs,
        metrics,
        max_retries: config.max_retries,
        retry_backoff: config.retry_backoff,
    };
    (handle, worker)
}

impl BackgroundWorker {
    /// Process jobs until `shutdown` is cancelled or every handle is dropped,
    /// then drain whatever is already queued.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("background worker starting");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("background worker received shutdown signal");
                    break;
                }
                job = self.rx.recv() => match job {
                    Some(job) => self.process(job).await,
                    None => break,
                },
            }
        }

        self.rx.close();
        while let Some(job) = self.rx.recv().await {
            self.process(job).await;
        }

        info!("background worker stopped");
    }

    async fn process(&self, job: Job) {
        match job {
            Job::DeleteBlob { digest, path } => self.delete_blob(&digest, &path).await,
            Job::CountDownload { file_id } => self.count_download(file_id).await,
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    async fn delete_blob(&self, digest: &Digest, path: &str) {
        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(error = %e, digest = %digest, "catalog unavailable, keeping blob");
                self.metrics.increment_blob_delete_failures();
                return;
            }
        };

        // The digest may have been uploaded again since it was released. The
        // lock keeps new registrations waiting until the blob is gone.
        match tx.lock_digest(digest).await {
            Ok(Some(content)) if content.path == path => {
                debug!(digest = %digest, "content re-registered, keeping blob");
            }
            Ok(_) => match self.blobs.delete(path).await {
                Ok(true) => {
                    debug!(digest = %digest, "blob deleted");
                    self.metrics.increment_blobs_deleted();
                }
                Ok(false) => debug!(digest = %digest, "blob already absent"),
                Err(e) => {
                    warn!(error = %e, digest = %digest, "failed to delete blob");
                    self.metrics.increment_blob_delete_failures();
                }
            },
            Err(e) => {
                warn!(error = %e, digest = %digest, "catalog check failed, keeping blob");
                self.metrics.increment_blob_delete_failures();
            }
        }

        if let Err(e) = tx.rollback().await {
            warn!(error = %e, digest = %digest, "releasing digest lock failed");
        }
    }

    async fn count_download(&self, file_id: FileId) {
        let mut attempt = 0;
        loop {
            match self.store.increment_download_count(file_id).await {
                Ok(true) => {
                    self.metrics.increment_downloads_counted();
                    return;
                }
                Ok(false) => {
                    debug!(file_id = %file_id, "file gone before download was counted");
                    return;
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    debug!(error = %e, file_id = %file_id, attempt, "retrying download count");
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) => {
                    warn!(error = %e, file_id = %file_id, "failed to count download");
                    return;
                }
            }
        }
    }
}
