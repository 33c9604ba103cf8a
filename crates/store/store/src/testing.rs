use chrono::{Duration, Utc};

use vault_core::{
    ContentId, Digest, DownloadTicket, FileId, FileUpdate, NewContent, NewFileRecord, OwnerId,
    TicketId,
};

use crate::error::StoreError;
use crate::store::{MetadataStore, RegisteredContent};

fn unique_digest() -> Digest {
    let a = uuid_u128();
    let b = uuid_u128();
    Digest::from_trusted(format!("{a:032x}{b:032x}"))
}

fn uuid_u128() -> u128 {
    ContentId::new().as_uuid().as_u128()
}

fn new_content(size: i64) -> NewContent {
    let digest = unique_digest();
    NewContent {
        path: format!("/blobs/{}/{digest}.txt", digest.shard()),
        digest,
        size,
        mime_type: "text/plain".into(),
    }
}

fn new_file(owner: OwnerId, content_id: ContentId, name: &str) -> NewFileRecord {
    NewFileRecord {
        id: FileId::new(),
        owner_id: owner,
        content_id,
        name: name.into(),
        folder_id: None,
        tags: vec!["conformance".into()],
        is_public: false,
        created_at: Utc::now(),
    }
}

async fn register(
    store: &dyn MetadataStore,
    content: &NewContent,
) -> Result<RegisteredContent, StoreError> {
    let mut tx = store.begin().await?;
    let registered = tx.register_or_increment(content, Utc::now()).await?;
    tx.commit().await?;
    Ok(registered)
}

/// Register `content` and bind one file to it, committing both.
async fn upload(
    store: &dyn MetadataStore,
    owner: OwnerId,
    content: &NewContent,
    name: &str,
) -> Result<(RegisteredContent, FileId), StoreError> {
    let mut tx = store.begin().await?;
    let registered = tx.register_or_increment(content, Utc::now()).await?;
    let file = tx
        .insert_file(new_file(owner, registered.content.id, name))
        .await?;
    tx.commit().await?;
    Ok((registered, file.id))
}

/// Run the full metadata store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_store_conformance_tests(store: &dyn MetadataStore) -> Result<(), StoreError> {
    test_register_new_content(store).await?;
    test_register_existing_increments(store).await?;
    test_rollback_discards(store).await?;
    test_dropped_transaction_discards(store).await?;
    test_lock_digest(store).await?;
    test_decrement_and_reclaim(store).await?;
    test_decrement_below_zero_conflicts(store).await?;
    test_decrement_missing(store).await?;
    test_file_lifecycle(store).await?;
    test_update_file_owner_only(store).await?;
    test_download_count(store).await?;
    test_concurrent_last_references(store).await?;
    test_tickets(store).await?;
    test_storage_stats(store).await?;
    test_duplicate_contents(store).await?;
    Ok(())
}

async fn test_register_new_content(store: &dyn MetadataStore) -> Result<(), StoreError> {
    let content = new_content(5);
    let registered = register(store, &content).await?;
    assert!(registered.inserted, "first registration should insert");
    assert_eq!(registered.content.reference_count, 1);
    assert_eq!(registered.content.digest, content.digest);
    assert_eq!(registered.content.path, content.path);

    let fetched = store.content_by_digest(&content.digest).await?;
    assert_eq!(fetched.map(|c| c.id), Some(registered.content.id));
    Ok(())
}

async fn test_register_existing_increments(store: &dyn MetadataStore) -> Result<(), StoreError> {
    let content = new_content(5);
    let first = register(store, &content).await?;

    let mut rival = content.clone();
    rival.path = format!("{}.other", content.path);
    let second = register(store, &rival).await?;

    assert!(!second.inserted, "second registration should increment");
    assert_eq!(second.content.id, first.content.id);
    assert_eq!(second.content.reference_count, 2);
    assert_eq!(
        second.content.path, content.path,
        "existing row keeps its original path"
    );
    Ok(())
}

async fn test_rollback_discards(store: &dyn MetadataStore) -> Result<(), StoreError> {
    let content = new_content(7);
    let mut tx = store.begin().await?;
    tx.register_or_increment(&content, Utc::now()).await?;
    tx.rollback().await?;

    assert!(store.content_by_digest(&content.digest).await?.is_none());
    Ok(())
}

async fn test_dropped_transaction_discards(store: &dyn MetadataStore) -> Result<(), StoreError> {
    let content = new_content(7);
    {
        let mut tx = store.begin().await?;
        tx.register_or_increment(&content, Utc::now()).await?;
    }
    assert!(store.content_by_digest(&content.digest).await?.is_none());
    Ok(())
}

async fn test_lock_digest(store: &dyn MetadataStore) -> Result<(), StoreError> {
    let content = new_content(4);

    let mut tx = store.begin().await?;
    assert!(tx.lock_digest(&content.digest).await?.is_none());
    tx.rollback().await?;

    let registered = register(store, &content).await?;
    let mut tx = store.begin().await?;
    let locked = tx.lock_digest(&content.digest).await?;
    tx.rollback().await?;
    assert_eq!(locked.as_ref().map(|c| c.id), Some(registered.content.id));
    assert_eq!(locked.map(|c| c.path), Some(content.path.clone()));

    // Registering within the same transaction after locking must not deadlock.
    let mut tx = store.begin().await?;
    tx.lock_digest(&content.digest).await?;
    let again = tx.register_or_increment(&content, Utc::now()).await?;
    tx.rollback().await?;
    assert_eq!(again.content.reference_count, 2);

    let row = store.content_by_digest(&content.digest).await?;
    assert_eq!(row.map(|c| c.reference_count), Some(1));
    Ok(())
}

async fn test_decrement_and_reclaim(store: &dyn MetadataStore) -> Result<(), StoreError> {
    let content = new_content(9);
    let id = register(store, &content).await?.content.id;
    register(store, &content).await?;

    let mut tx = store.begin().await?;
    assert_eq!(tx.decrement(id).await?, 1);
    tx.commit().await?;
    let row = store.content(id).await?;
    assert_eq!(row.map(|c| c.reference_count), Some(1));

    let mut tx = store.begin().await?;
    assert_eq!(tx.decrement(id).await?, 0);
    let reclaimed = tx.reclaim(id).await?;
    tx.commit().await?;

    assert_eq!(reclaimed.path, content.path);
    assert_eq!(reclaimed.digest, content.digest);
    assert!(store.content(id).await?.is_none());
    assert!(store.content_by_digest(&content.digest).await?.is_none());
    Ok(())
}

async fn test_decrement_below_zero_conflicts(store: &dyn MetadataStore) -> Result<(), StoreError> {
    let content = new_content(3);
    let id = register(store, &content).await?.content.id;

    let mut tx = store.begin().await?;
    assert_eq!(tx.decrement(id).await?, 0);
    let second = tx.decrement(id).await;
    assert!(
        matches!(second, Err(StoreError::Conflict(_))),
        "decrement at zero should conflict, got {second:?}"
    );
    tx.rollback().await?;

    let row = store.content(id).await?;
    assert_eq!(row.map(|c| c.reference_count), Some(1));
    Ok(())
}

async fn test_decrement_missing(store: &dyn MetadataStore) -> Result<(), StoreError> {
    let mut tx = store.begin().await?;
    let result = tx.decrement(ContentId::new()).await;
    assert!(
        matches!(result, Err(StoreError::NotFound(_))),
        "decrement of missing content should be not-found, got {result:?}"
    );
    tx.rollback().await?;
    Ok(())
}

async fn test_file_lifecycle(store: &dyn MetadataStore) -> Result<(), StoreError> {
    let owner = OwnerId::new();
    let content = new_content(11);
    let (registered, file_id) = upload(store, owner, &content, "a.txt").await?;

    let file = store.file(file_id).await?;
    let file = file.ok_or_else(|| StoreError::NotFound(file_id.to_string()))?;
    assert_eq!(file.owner_id, owner);
    assert_eq!(file.content_id, registered.content.id);
    assert_eq!(file.name, "a.txt");
    assert_eq!(file.tags, vec!["conformance".to_owned()]);
    assert_eq!(file.download_count, 0);

    let (_, second_id) = upload(store, owner, &new_content(1), "b.txt").await?;
    let listed = store.files_for_owner(owner).await?;
    let ids: Vec<FileId> = listed.iter().map(|f| f.id).collect();
    assert_eq!(ids, vec![second_id, file_id], "newest file should be listed first");
    assert!(store.files_for_owner(OwnerId::new()).await?.is_empty());

    let mut tx = store.begin().await?;
    let locked = tx.lock_file(file_id).await?;
    assert_eq!(locked.map(|f| f.id), Some(file_id));
    assert!(tx.lock_file(FileId::new()).await?.is_none());
    assert!(tx.remove_file(file_id).await?);
    assert!(!tx.remove_file(file_id).await?);
    tx.commit().await?;

    assert!(store.file(file_id).await?.is_none());
    Ok(())
}

async fn test_update_file_owner_only(store: &dyn MetadataStore) -> Result<(), StoreError> {
    let owner = OwnerId::new();
    let (_, file_id) = upload(store, owner, &new_content(2), "draft.txt").await?;
    let update = FileUpdate {
        name: Some("final.txt".into()),
        is_public: Some(true),
        ..FileUpdate::default()
    };

    let stranger = store
        .update_file(file_id, OwnerId::new(), &update, Utc::now())
        .await?;
    assert!(stranger.is_none(), "non-owner update should not match");

    let updated = store
        .update_file(file_id, owner, &update, Utc::now())
        .await?
        .ok_or_else(|| StoreError::NotFound(file_id.to_string()))?;
    assert_eq!(updated.name, "final.txt");
    assert!(updated.is_public);
    assert_eq!(updated.tags, vec!["conformance".to_owned()]);

    let missing = store
        .update_file(FileId::new(), owner, &update, Utc::now())
        .await?;
    assert!(missing.is_none());
    Ok(())
}

async fn test_download_count(store: &dyn MetadataStore) -> Result<(), StoreError> {
    let (_, file_id) = upload(store, OwnerId::new(), &new_content(2), "d.txt").await?;
    assert!(store.increment_download_count(file_id).await?);
    assert!(store.increment_download_count(file_id).await?);
    let count = store.file(file_id).await?.map(|f| f.download_count);
    assert_eq!(count, Some(2));
    assert!(!store.increment_download_count(FileId::new()).await?);
    Ok(())
}

async fn test_concurrent_last_references(store: &dyn MetadataStore) -> Result<(), StoreError> {
    let content = new_content(4);
    let (registered, first) = upload(store, OwnerId::new(), &content, "x.txt").await?;
    let (_, second) = upload(store, OwnerId::new(), &content, "y.txt").await?;
    let id = registered.content.id;

    let delete = |file_id: FileId| async move {
        let mut tx = store.begin().await?;
        tx.lock_file(file_id).await?;
        let remaining = tx.decrement(id).await?;
        let reclaimed = if remaining <= 0 {
            Some(tx.reclaim(id).await?)
        } else {
            None
        };
        tx.remove_file(file_id).await?;
        tx.commit().await?;
        Ok::<_, StoreError>(reclaimed)
    };

    let (a, b) = tokio::join!(delete(first), delete(second));
    let reclaims = [a?, b?].into_iter().flatten().count();
    assert_eq!(reclaims, 1, "exactly one delete should reclaim");
    assert!(store.content(id).await?.is_none());
    Ok(())
}

async fn test_tickets(store: &dyn MetadataStore) -> Result<(), StoreError> {
    let now = Utc::now();
    let make = |expires_at| DownloadTicket {
        id: TicketId::new(),
        issuer_id: OwnerId::new(),
        owner_id: OwnerId::new(),
        file_id: FileId::new(),
        content_id: ContentId::new(),
        filename: "t.txt".into(),
        expires_at,
    };
    let live = make(now + Duration::hours(1));
    let stale = make(now - Duration::minutes(1));
    store.insert_ticket(&live).await?;
    store.insert_ticket(&stale).await?;

    let fetched = store
        .ticket(live.id)
        .await?
        .ok_or_else(|| StoreError::NotFound(live.id.to_string()))?;
    assert_eq!(fetched.issuer_id, live.issuer_id);
    assert_eq!(fetched.file_id, live.file_id);
    assert_eq!(fetched.filename, "t.txt");
    assert!(store.ticket(TicketId::new()).await?.is_none());

    let removed = store.purge_expired_tickets(now).await?;
    assert!(removed >= 1, "stale ticket should be purged");
    assert!(store.ticket(stale.id).await?.is_none());
    assert!(store.ticket(live.id).await?.is_some());
    assert_eq!(store.purge_expired_tickets(now).await?, 0);
    Ok(())
}

async fn test_storage_stats(store: &dyn MetadataStore) -> Result<(), StoreError> {
    let before = store.storage_stats().await?;
    let alice = OwnerId::new();
    let bob = OwnerId::new();
    let shared = new_content(100);
    upload(store, alice, &shared, "s1.bin").await?;
    upload(store, bob, &shared, "s2.bin").await?;
    upload(store, alice, &new_content(10), "own.bin").await?;

    let after = store.storage_stats().await?;
    assert_eq!(after.total_used - before.total_used, 110);
    assert_eq!(after.original_size - before.original_size, 210);
    assert_eq!(after.file_count - before.file_count, 3);
    assert_eq!(after.user_count - before.user_count, 2);

    let alice_stats = store.owner_storage_stats(alice).await?;
    assert_eq!(alice_stats.total_used, 60, "shared blob split across two owners");
    assert_eq!(alice_stats.original_size, 110);
    assert_eq!(alice_stats.file_count, 2);
    Ok(())
}

async fn test_duplicate_contents(store: &dyn MetadataStore) -> Result<(), StoreError> {
    let content = new_content(1_000_000);
    for name in ["1", "2", "3"] {
        upload(store, OwnerId::new(), &content, name).await?;
    }
    let dups = store.duplicate_contents(10, 0).await?;
    let top = dups
        .first()
        .ok_or_else(|| StoreError::NotFound("duplicates".into()))?;
    assert_eq!(top.content.digest, content.digest);
    assert_eq!(top.content.reference_count, 3);
    assert_eq!(top.saved_bytes, 2_000_000);
    assert!(dups.iter().all(|d| d.content.reference_count > 1));

    let paged = store.duplicate_contents(10, 1).await?;
    assert!(paged.iter().all(|d| d.content.digest != content.digest));
    Ok(())
}
