use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeDelta, TimeZone, Utc};
use futures::future::join_all;
use tokio::io::AsyncReadExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vault_blob::{BlobError, BlobReader, BlobStore, FsBlobStore, WrittenBlob, fingerprint};
use vault_core::{
    Caller, Digest, ErrorKind, FileRecord, FileUpdate, ManualClock, OwnerId, VaultError,
};
use vault_engine::{EngineConfig, TicketSweeper, UploadItem, Vault, VaultBuilder};
use vault_store::MetadataStore;
use vault_store_memory::MemoryMetadataStore;

struct Harness {
    dir: tempfile::TempDir,
    store: Arc<MemoryMetadataStore>,
    clock: Arc<ManualClock>,
    vault: Vault,
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(FsBlobStore::new(dir.path()).await.unwrap());
        Self::with_blobs(dir, blobs, EngineConfig::default())
    }

    async fn with_config(config: EngineConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(FsBlobStore::new(dir.path()).await.unwrap());
        Self::with_blobs(dir, blobs, config)
    }

    fn with_blobs(dir: tempfile::TempDir, blobs: Arc<dyn BlobStore>, config: EngineConfig) -> Self {
        let store = Arc::new(MemoryMetadataStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let (vault, worker) = VaultBuilder::new()
            .metadata_store(Arc::clone(&store) as Arc<dyn MetadataStore>)
            .blob_store(blobs)
            .clock(Arc::clone(&clock) as Arc<dyn vault_core::Clock>)
            .config(config)
            .build()
            .unwrap();
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(worker.run(shutdown.clone()));
        Self {
            dir,
            store,
            clock,
            vault,
            shutdown,
            worker,
        }
    }

    async fn hooked(configure: impl FnOnce(&mut HookedDisk)) -> (Self, Arc<HookedDisk>) {
        let dir = tempfile::tempdir().unwrap();
        let mut disk = HookedDisk::new(FsBlobStore::new(dir.path()).await.unwrap());
        configure(&mut disk);
        let disk = Arc::new(disk);
        let h = Self::with_blobs(
            dir,
            Arc::clone(&disk) as Arc<dyn BlobStore>,
            EngineConfig::default(),
        );
        (h, disk)
    }

    async fn upload(&self, caller: &Caller, name: &str, mime: &str, data: &'static [u8]) -> FileRecord {
        let mut results = self
            .vault
            .upload_files(
                caller,
                None,
                vec![UploadItem::new(name, mime, Bytes::from_static(data))],
                &CancellationToken::new(),
            )
            .await;
        results.remove(0).unwrap()
    }

    async fn refcount(&self, record: &FileRecord) -> Option<i64> {
        self.vault
            .content(record.content_id)
            .await
            .unwrap()
            .map(|c| c.reference_count)
    }

    async fn settle(&self) {
        self.vault.background().flush().await;
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.worker.await.unwrap();
    }
}

/// Every finished blob file under `root`, ignoring temporaries.
fn blob_files(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for shard in std::fs::read_dir(root).unwrap() {
        let shard = shard.unwrap().path();
        if !shard.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&shard).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().is_some_and(|ext| ext != "tmp") {
                found.push(path);
            }
        }
    }
    found
}

fn user() -> Caller {
    Caller::user(OwnerId::new())
}

#[tokio::test]
async fn concurrent_identical_uploads_share_one_blob() {
    let h = Harness::new().await;
    let (alice, bob) = (user(), user());
    let cancel = CancellationToken::new();

    let (a, b) = tokio::join!(
        h.vault.upload_files(
            &alice,
            None,
            vec![UploadItem::new("report.pdf", "application/pdf", Bytes::from_static(b"%PDF-same"))],
            &cancel,
        ),
        h.vault.upload_files(
            &bob,
            None,
            vec![UploadItem::new("copy.pdf", "application/pdf", Bytes::from_static(b"%PDF-same"))],
            &cancel,
        ),
    );
    let a = a.into_iter().next().unwrap().unwrap();
    let b = b.into_iter().next().unwrap().unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(a.content_id, b.content_id);
    assert_eq!(h.refcount(&a).await, Some(2));
    h.settle().await;
    assert_eq!(blob_files(h.dir.path()).len(), 1);
    h.stop().await;
}

#[tokio::test]
async fn shared_content_survives_one_owner_deleting() {
    let h = Harness::new().await;
    let (u1, u2) = (user(), user());

    let a = h.upload(&u1, "a.txt", "text/plain", b"hello").await;
    let b = h.upload(&u2, "b.txt", "text/plain", b"hello").await;
    assert_eq!(a.content_id, b.content_id);
    assert_eq!(h.refcount(&a).await, Some(2));

    let content = h.vault.content(a.content_id).await.unwrap().unwrap();
    assert_eq!(content.digest, fingerprint(b"hello"));
    assert_eq!(
        content.digest.as_str(),
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );

    let outcome = h.vault.delete_file(&u1, a.id).await.unwrap();
    assert_eq!(outcome.remaining_references, 1);
    assert!(!outcome.reclaimed);
    h.settle().await;
    assert_eq!(h.refcount(&b).await, Some(1));
    assert_eq!(blob_files(h.dir.path()).len(), 1);

    let ticket = h.vault.issue_download_ticket(&u2, b.id).await.unwrap();
    let grant = h.vault.consume_download_ticket(ticket.id, u2.id).await.unwrap();
    assert_eq!(grant.filename, "b.txt");
    assert_eq!(grant.mime_type, "text/plain");
    assert_eq!(grant.size, 5);

    let mut reader = h.vault.open_blob(&grant.path).await.unwrap();
    let mut body = Vec::new();
    reader.read_to_end(&mut body).await.unwrap();
    assert_eq!(body, b"hello");
    h.stop().await;
}

#[tokio::test]
async fn non_owner_delete_is_refused_without_changes() {
    let h = Harness::new().await;
    let (u2, u3) = (user(), user());
    let b = h.upload(&u2, "b.txt", "text/plain", b"hello").await;

    let err = h.vault.delete_file(&u3, b.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(err.public_message(), "not allowed");

    assert!(h.vault.file(b.id).await.unwrap().is_some());
    assert_eq!(h.refcount(&b).await, Some(1));
    h.stop().await;
}

#[tokio::test]
async fn admin_may_delete_any_file() {
    let h = Harness::new().await;
    let owner = user();
    let admin = Caller::admin(OwnerId::new());
    let file = h.upload(&owner, "x.bin", "application/octet-stream", b"\x00\x01").await;

    let outcome = h.vault.delete_file(&admin, file.id).await.unwrap();
    assert!(outcome.reclaimed);
    h.settle().await;
    assert!(blob_files(h.dir.path()).is_empty());
    h.stop().await;
}

#[tokio::test]
async fn concurrent_deletes_of_last_references_reclaim_once() {
    let h = Harness::new().await;
    let owners: Vec<Caller> = (0..8).map(|_| user()).collect();
    let mut records = Vec::new();
    for owner in &owners {
        records.push(h.upload(owner, "same.txt", "text/plain", b"shared bytes").await);
    }
    let content_id = records[0].content_id;
    assert_eq!(h.refcount(&records[0]).await, Some(8));

    let deletes = owners
        .iter()
        .zip(&records)
        .map(|(owner, record)| h.vault.delete_file(owner, record.id));
    let outcomes: Vec<_> = join_all(deletes)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.reclaimed).count(), 1);
    assert!(outcomes.iter().all(|o| o.remaining_references >= 0));
    assert!(h.vault.content(content_id).await.unwrap().is_none());

    h.settle().await;
    assert!(blob_files(h.dir.path()).is_empty());
    let snapshot = h.vault.metrics().snapshot();
    assert_eq!(snapshot.reclaimed, 1);
    assert_eq!(snapshot.blobs_deleted, 1);
    h.stop().await;
}

#[tokio::test]
async fn concurrent_deletes_of_one_file_decrement_once() {
    let h = Harness::new().await;
    let (u1, u2) = (user(), user());
    let a = h.upload(&u1, "a.txt", "text/plain", b"twice").await;
    let b = h.upload(&u2, "b.txt", "text/plain", b"twice").await;

    let (first, second) = tokio::join!(h.vault.delete_file(&u1, a.id), h.vault.delete_file(&u1, a.id));
    let errors: Vec<VaultError> = [first, second].into_iter().filter_map(Result::err).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::NotFound);
    assert_eq!(h.refcount(&b).await, Some(1));
    h.stop().await;
}

#[tokio::test]
async fn same_bytes_under_another_mime_reuse_the_stored_blob() {
    let h = Harness::new().await;
    let owner = user();
    let first = h.upload(&owner, "notes.txt", "text/plain", b"plain words").await;
    let second = h.upload(&owner, "notes.md", "text/markdown", b"plain words").await;

    assert_eq!(first.content_id, second.content_id);
    assert_eq!(h.refcount(&first).await, Some(2));
    h.settle().await;
    assert_eq!(blob_files(h.dir.path()).len(), 1);
    assert_eq!(h.vault.metrics().snapshot().deduplicated, 1);
    h.stop().await;
}

#[tokio::test]
async fn ticket_is_valid_until_its_ttl_elapses() {
    let h = Harness::new().await;
    let owner = user();
    let file = h.upload(&owner, "a.txt", "text/plain", b"ttl").await;
    let ticket = h.vault.issue_download_ticket(&owner, file.id).await.unwrap();

    h.clock.advance(TimeDelta::minutes(59));
    h.vault.consume_download_ticket(ticket.id, owner.id).await.unwrap();

    h.clock.advance(TimeDelta::minutes(2));
    let err = h.vault.consume_download_ticket(ticket.id, owner.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    h.stop().await;
}

#[tokio::test]
async fn ticket_is_bound_to_its_issuer() {
    let h = Harness::new().await;
    let (owner, other) = (user(), user());
    let file = h.upload(&owner, "a.txt", "text/plain", b"bound").await;
    let ticket = h.vault.issue_download_ticket(&owner, file.id).await.unwrap();

    let err = h.vault.consume_download_ticket(ticket.id, other.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    h.stop().await;
}

#[tokio::test]
async fn private_files_are_invisible_to_others() {
    let h = Harness::new().await;
    let (owner, other) = (user(), user());
    let file = h.upload(&owner, "secret.txt", "text/plain", b"private").await;

    let err = h.vault.issue_download_ticket(&other, file.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.public_message(), "not found");
    h.stop().await;
}

#[tokio::test]
async fn only_downloads_by_others_are_counted() {
    let h = Harness::new().await;
    let (owner, reader) = (user(), user());
    let file = h.upload(&owner, "shared.txt", "text/plain", b"public").await;
    h.vault
        .update_file(
            &owner,
            file.id,
            FileUpdate {
                is_public: Some(true),
                ..FileUpdate::default()
            },
        )
        .await
        .unwrap();

    for _ in 0..2 {
        let ticket = h.vault.issue_download_ticket(&reader, file.id).await.unwrap();
        h.vault.consume_download_ticket(ticket.id, reader.id).await.unwrap();
    }
    let ticket = h.vault.issue_download_ticket(&owner, file.id).await.unwrap();
    h.vault.consume_download_ticket(ticket.id, owner.id).await.unwrap();

    h.settle().await;
    let stored = h.vault.file(file.id).await.unwrap().unwrap();
    assert_eq!(stored.download_count, 2);
    h.stop().await;
}

/// Blob store whose writes always fail.
struct BrokenDisk;

#[async_trait]
impl BlobStore for BrokenDisk {
    fn path_for(&self, digest: &Digest, extension: &str) -> String {
        format!("/broken/{digest}.{extension}")
    }

    async fn exists(&self, digest: &Digest, extension: &str) -> Result<(bool, String), BlobError> {
        Ok((false, self.path_for(digest, extension)))
    }

    async fn contains(&self, _path: &str) -> Result<bool, BlobError> {
        Ok(false)
    }

    async fn write(&self, _: &Digest, _: &str, _: Bytes) -> Result<WrittenBlob, BlobError> {
        Err(BlobError::Io(std::io::Error::other("no space left on device")))
    }

    async fn read(&self, path: &str) -> Result<Bytes, BlobError> {
        Err(BlobError::NotFound(path.to_owned()))
    }

    async fn open(&self, path: &str) -> Result<BlobReader, BlobError> {
        Err(BlobError::NotFound(path.to_owned()))
    }

    async fn delete(&self, _path: &str) -> Result<bool, BlobError> {
        Ok(false)
    }
}

#[tokio::test]
async fn failed_blob_write_leaves_catalog_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::with_blobs(dir, Arc::new(BrokenDisk), EngineConfig::default());
    let owner = user();

    let results = h
        .vault
        .upload_files(
            &owner,
            None,
            vec![UploadItem::new("a.txt", "text/plain", Bytes::from_static(b"lost"))],
            &CancellationToken::new(),
        )
        .await;
    let err = results.into_iter().next().unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageIo);
    assert_eq!(err.public_message(), "internal error");

    assert!(h.store.content_by_digest(&fingerprint(b"lost")).await.unwrap().is_none());
    assert!(h.vault.files_for_owner(owner.id).await.unwrap().is_empty());
    assert_eq!(h.vault.metrics().snapshot().upload_failures, 1);
    h.stop().await;
}

#[tokio::test]
async fn cancelled_upload_leaves_nothing_behind() {
    let h = Harness::new().await;
    let owner = user();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let results = h
        .vault
        .upload_files(
            &owner,
            None,
            vec![UploadItem::new("a.txt", "text/plain", Bytes::from_static(b"never"))],
            &cancel,
        )
        .await;
    assert_eq!(results[0].as_ref().unwrap_err().kind(), ErrorKind::Validation);

    assert!(blob_files(h.dir.path()).is_empty());
    assert!(h.store.content_by_digest(&fingerprint(b"never")).await.unwrap().is_none());
    h.stop().await;
}

#[tokio::test]
async fn batch_results_follow_input_order() {
    let h = Harness::with_config(EngineConfig {
        max_upload_bytes: 8,
        ..EngineConfig::default()
    })
    .await;
    let owner = user();

    let results = h
        .vault
        .upload_files(
            &owner,
            None,
            vec![
                UploadItem::new("small.txt", "text/plain", Bytes::from_static(b"tiny")),
                UploadItem::new("big.txt", "text/plain", Bytes::from_static(b"far too large")),
                UploadItem::new(&b"bad\xff/name\x07.txt"[..], "text/plain\r\n", Bytes::from_static(b"ok")),
            ],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().name, "small.txt");
    assert_eq!(results[1].as_ref().unwrap_err().kind(), ErrorKind::Validation);
    let sanitized = results[2].as_ref().unwrap();
    assert_eq!(sanitized.name, "bad_name_.txt");

    let content = h.vault.content(sanitized.content_id).await.unwrap().unwrap();
    assert_eq!(content.mime_type, "text/plain");
    assert_eq!(h.vault.files_for_owner(owner.id).await.unwrap().len(), 2);
    h.stop().await;
}

#[tokio::test]
async fn sweeper_removes_only_expired_tickets() {
    let h = Harness::new().await;
    let owner = user();
    let file = h.upload(&owner, "a.txt", "text/plain", b"sweep").await;

    h.vault.issue_download_ticket(&owner, file.id).await.unwrap();
    h.vault.issue_download_ticket(&owner, file.id).await.unwrap();
    h.clock.advance(TimeDelta::minutes(30));
    let fresh = h.vault.issue_download_ticket(&owner, file.id).await.unwrap();

    let sweeper = TicketSweeper::new(h.vault.clone());
    assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

    h.clock.advance(TimeDelta::minutes(31));
    assert_eq!(sweeper.sweep_once().await.unwrap(), 2);
    assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

    h.vault.consume_download_ticket(fresh.id, owner.id).await.unwrap();
    assert_eq!(h.vault.metrics().snapshot().tickets_swept, 2);
    h.stop().await;
}

#[tokio::test]
async fn sweeper_stops_on_shutdown() {
    let h = Harness::new().await;
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(
        TicketSweeper::new(h.vault.clone())
            .with_interval(Duration::from_millis(10))
            .run(shutdown.clone()),
    );
    shutdown.cancel();
    task.await.unwrap();
    h.stop().await;
}

#[tokio::test]
async fn update_renames_and_moves_owned_files_only() {
    let h = Harness::new().await;
    let (owner, other) = (user(), user());
    let file = h.upload(&owner, "draft.txt", "text/plain", b"draft").await;

    let updated = h
        .vault
        .update_file(
            &owner,
            file.id,
            FileUpdate {
                name: Some("../final report.txt".into()),
                tags: Some(vec!["work".into()]),
                ..FileUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "_final report.txt");
    assert_eq!(updated.tags, vec!["work".to_owned()]);
    assert_eq!(updated.content_id, file.content_id);

    let err = h
        .vault
        .update_file(
            &other,
            file.id,
            FileUpdate {
                is_public: Some(true),
                ..FileUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = h
        .vault
        .update_file(&owner, file.id, FileUpdate::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    h.stop().await;
}

#[tokio::test]
async fn stats_report_deduplication_savings() {
    let h = Harness::new().await;
    let (u1, u2) = (user(), user());
    h.upload(&u1, "a.txt", "text/plain", b"0123456789").await;
    h.upload(&u2, "b.txt", "text/plain", b"0123456789").await;
    h.upload(&u2, "c.txt", "text/plain", b"unique").await;

    let stats = h.vault.storage_stats().await.unwrap();
    assert_eq!(stats.total_used, 16);
    assert_eq!(stats.original_size, 26);
    assert_eq!(stats.saved_bytes, 10);
    assert_eq!(stats.file_count, 3);
    assert_eq!(stats.user_count, 2);

    let u1_stats = h.vault.owner_storage_stats(u1.id).await.unwrap();
    assert_eq!(u1_stats.total_used, 5);
    assert_eq!(u1_stats.original_size, 10);

    let duplicates = h.vault.duplicate_contents(10, 0).await.unwrap();
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].saved_bytes, 10);
    h.stop().await;
}

/// Filesystem store with hooks for interleaving uploads with the disk.
struct HookedDisk {
    inner: FsBlobStore,
    /// Delay applied to every `contains` check.
    slow_contains: Option<Duration>,
    /// Remove the blob on the next `contains` check and report it missing.
    vanish_next: AtomicBool,
    /// Writes under this extension signal `reached` and wait for `gate`.
    gated_extension: Option<&'static str>,
    reached: Notify,
    gate: Notify,
}

impl HookedDisk {
    fn new(inner: FsBlobStore) -> Self {
        Self {
            inner,
            slow_contains: None,
            vanish_next: AtomicBool::new(false),
            gated_extension: None,
            reached: Notify::new(),
            gate: Notify::new(),
        }
    }
}

#[async_trait]
impl BlobStore for HookedDisk {
    fn path_for(&self, digest: &Digest, extension: &str) -> String {
        self.inner.path_for(digest, extension)
    }

    async fn exists(&self, digest: &Digest, extension: &str) -> Result<(bool, String), BlobError> {
        self.inner.exists(digest, extension).await
    }

    async fn contains(&self, path: &str) -> Result<bool, BlobError> {
        if let Some(delay) = self.slow_contains {
            tokio::time::sleep(delay).await;
        }
        if self.vanish_next.swap(false, Ordering::SeqCst) {
            self.inner.delete(path).await?;
            return Ok(false);
        }
        self.inner.contains(path).await
    }

    async fn write(&self, digest: &Digest, extension: &str, data: Bytes) -> Result<WrittenBlob, BlobError> {
        if self.gated_extension == Some(extension) {
            self.reached.notify_one();
            self.gate.notified().await;
        }
        self.inner.write(digest, extension, data).await
    }

    async fn read(&self, path: &str) -> Result<Bytes, BlobError> {
        self.inner.read(path).await
    }

    async fn open(&self, path: &str) -> Result<BlobReader, BlobError> {
        self.inner.open(path).await
    }

    async fn delete(&self, path: &str) -> Result<bool, BlobError> {
        self.inner.delete(path).await
    }
}

#[tokio::test]
async fn abandoned_upload_still_registers_its_blob() {
    let (h, _disk) = Harness::hooked(|disk| disk.slow_contains = Some(Duration::from_millis(300))).await;
    let owner = user();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        h.vault.upload_files(
            &owner,
            None,
            vec![UploadItem::new("late.txt", "text/plain", Bytes::from_static(b"late"))],
            &CancellationToken::new(),
        ),
    )
    .await;
    assert!(abandoned.is_err(), "caller should give up before registration");

    h.vault.wait_for_uploads().await;
    h.settle().await;

    let files = h.vault.files_for_owner(owner.id).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "late.txt");
    assert_eq!(h.refcount(&files[0]).await, Some(1));
    assert_eq!(blob_files(h.dir.path()).len(), 1);
    assert_eq!(h.vault.metrics().snapshot().uploads, 1);
    h.stop().await;
}

#[tokio::test]
async fn reupload_restores_a_blob_missing_from_disk() {
    let h = Harness::new().await;
    let owner = user();
    let first = h.upload(&owner, "a.txt", "text/plain", b"restored").await;
    let path = h.vault.content(first.content_id).await.unwrap().unwrap().path;
    std::fs::remove_file(&path).unwrap();

    let second = h.upload(&owner, "b.txt", "text/plain", b"restored").await;
    h.settle().await;

    assert_eq!(second.content_id, first.content_id);
    assert_eq!(h.refcount(&first).await, Some(2));
    assert!(Path::new(&path).exists());
    assert_eq!(h.vault.metrics().snapshot().blobs_deleted, 0);
    h.stop().await;
}

#[tokio::test]
async fn blob_vanishing_before_registration_is_rewritten() {
    let (h, disk) = Harness::hooked(|_| {}).await;
    let owner = user();
    disk.vanish_next.store(true, Ordering::SeqCst);

    let record = h.upload(&owner, "a.txt", "text/plain", b"again").await;
    h.settle().await;

    let content = h.vault.content(record.content_id).await.unwrap().unwrap();
    assert_eq!(content.reference_count, 1);
    assert!(!disk.vanish_next.load(Ordering::SeqCst));
    assert!(Path::new(&content.path).exists());
    assert_eq!(blob_files(h.dir.path()).len(), 1);
    h.stop().await;
}

#[tokio::test]
async fn copy_that_loses_the_registration_race_is_released() {
    let (h, disk) = Harness::hooked(|disk| disk.gated_extension = Some("markdown")).await;
    let owner = user();

    let vault = h.vault.clone();
    let slow = tokio::spawn(async move {
        vault
            .upload_files(
                &owner,
                None,
                vec![UploadItem::new("notes.md", "text/markdown", Bytes::from_static(b"race"))],
                &CancellationToken::new(),
            )
            .await
    });
    disk.reached.notified().await;

    // Registers first while the markdown copy is still being written.
    let winner = h.upload(&owner, "notes.txt", "text/plain", b"race").await;
    disk.gate.notify_one();
    let loser = slow.await.unwrap().remove(0).unwrap();
    h.settle().await;

    assert_eq!(loser.content_id, winner.content_id);
    assert_eq!(h.refcount(&winner).await, Some(2));
    let files = blob_files(h.dir.path());
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].extension().unwrap(), "txt");
    assert_eq!(h.vault.metrics().snapshot().blobs_deleted, 1);
    h.stop().await;
}

#[tokio::test]
async fn missing_blob_under_another_extension_fails_the_upload() {
    let h = Harness::new().await;
    let owner = user();
    let first = h.upload(&owner, "a.txt", "text/plain", b"orphaned").await;
    let path = h.vault.content(first.content_id).await.unwrap().unwrap().path;
    std::fs::remove_file(&path).unwrap();

    let mut results = h
        .vault
        .upload_files(
            &owner,
            None,
            vec![UploadItem::new("a.md", "text/markdown", Bytes::from_static(b"orphaned"))],
            &CancellationToken::new(),
        )
        .await;
    let err = results.remove(0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageIo);
    h.settle().await;

    assert_eq!(h.refcount(&first).await, Some(1));
    assert_eq!(h.vault.files_for_owner(owner.id).await.unwrap().len(), 1);
    assert!(blob_files(h.dir.path()).is_empty());
    assert_eq!(h.vault.metrics().snapshot().blobs_deleted, 1);
    h.stop().await;
}
