#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use cachedfs::cache::{
    Attributes, FileStore, MetadataCache, MetadataKind, Presence, Record, SnapshotStore as _,
};

async fn file_cache(dir: &tempfile::TempDir) -> MetadataCache<FileStore> {
    let store = FileStore::new(&dir.path().join("cache").join("metadata.json"))
        .await
        .unwrap();
    MetadataCache::new(store)
}

#[tokio::test]
async fn existence_is_tri_state() {
    let cache = MetadataCache::default();
    assert_eq!(cache.has("x.txt"), Presence::Unknown);

    cache.store_miss("x.txt").await;
    assert_eq!(cache.has("x.txt"), Presence::Absent);
    assert!(cache.get("x.txt").is_none());

    let attrs = Attributes {
        size: Some(3),
        ..Attributes::default()
    };
    cache.update_record("x.txt", attrs, true).await;
    assert_eq!(cache.has("x.txt"), Presence::Present);
    assert_eq!(cache.get("x.txt").unwrap().size, Some(3));
}

#[tokio::test]
async fn partial_records_only_answer_known_fields() {
    let cache = MetadataCache::default();
    let attrs = Attributes {
        size: Some(7),
        ..Attributes::default()
    };
    cache.update_record("f.bin", attrs, true).await;

    assert!(cache.get_with("f.bin", MetadataKind::Size).is_some());
    assert!(cache.get_with("f.bin", MetadataKind::MimeType).is_none());
    assert!(cache.get_with("f.bin", MetadataKind::LastModified).is_none());
}

#[tokio::test]
async fn relisting_prunes_entries_the_backend_no_longer_reports() {
    let cache = MetadataCache::default();
    cache
        .store_listing(
            "a",
            vec![Record::file("a/b.txt"), Record::file("a/c.txt")],
            false,
        )
        .await;
    cache
        .store_listing("a", vec![Record::file("a/b.txt")], false)
        .await;

    let listing = cache.list_contents("a", false).unwrap();
    assert_eq!(listing, [Record::file("a/b.txt")]);
    assert_eq!(cache.has("a/c.txt"), Presence::Absent);
}

#[tokio::test]
async fn file_store_persists_across_instances() {
    let dir = tempfile::tempdir().unwrap();

    let cache = file_cache(&dir).await;
    cache
        .store_listing("a", vec![Record::file("a/b.txt").with_size(5)], false)
        .await;
    cache.store_miss("gone").await;
    assert!(cache.store().path().exists(), "autosave should have written");

    let reopened = file_cache(&dir).await;
    assert!(reopened.load().await);
    assert_eq!(reopened.get("a/b.txt").unwrap().size, Some(5));
    assert_eq!(reopened.has("a/zzz"), Presence::Absent);
    assert_eq!(reopened.has("gone"), Presence::Absent);
    assert_eq!(reopened.has("elsewhere"), Presence::Unknown);
    assert!(reopened.is_complete("a", false));
}

#[tokio::test]
async fn disabled_autosave_writes_only_on_explicit_save() {
    let dir = tempfile::tempdir().unwrap();
    let cache = file_cache(&dir).await;
    cache.set_autosave(false);

    cache.store_miss("x").await;
    assert!(!cache.store().path().exists());

    cache.save().await.unwrap();
    assert!(cache.store().path().exists());

    let reopened = file_cache(&dir).await;
    assert!(reopened.load().await);
    assert_eq!(reopened.has("x"), Presence::Absent);
}

#[tokio::test]
async fn missing_snapshot_file_is_a_cold_start() {
    let dir = tempfile::tempdir().unwrap();
    let cache = file_cache(&dir).await;
    assert!(!cache.load().await);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn corrupt_snapshot_file_is_a_cold_start() {
    let dir = tempfile::tempdir().unwrap();
    let cache = file_cache(&dir).await;
    cache.store_miss("x").await;

    cache.store().save(b"{ not json".to_vec()).await.unwrap();
    assert!(!cache.load().await);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn expired_snapshot_is_a_cold_start() {
    let dir = tempfile::tempdir().unwrap();
    let cache = file_cache(&dir).await.with_expiry(Duration::from_secs(3600));
    cache.store_miss("x").await;

    let reopened = file_cache(&dir).await;
    assert!(reopened.load().await, "snapshot is still fresh");

    let mut stale = cache.snapshot();
    stale.expires_at = Some(1);
    cache.store().save(stale.encode().unwrap()).await.unwrap();

    assert!(!reopened.load().await);
    assert!(reopened.is_empty());
}

#[tokio::test]
async fn snapshot_with_another_version_is_discarded() {
    let cache = MetadataCache::default();
    cache.store_miss("x").await;

    let mut snapshot = cache.snapshot();
    snapshot.version += 1;

    let other = MetadataCache::default();
    other.store_miss("y").await;
    assert!(!other.restore(snapshot));
    assert!(other.is_empty(), "a rejected snapshot leaves an empty cache");
}

#[tokio::test]
async fn restore_replaces_the_current_state() {
    let source = MetadataCache::default();
    source
        .update_record("kept.txt", Attributes::default(), true)
        .await;

    let target = MetadataCache::default();
    target.store_miss("old").await;
    assert!(target.restore(source.snapshot()));

    assert_eq!(target.has("old"), Presence::Unknown);
    assert_eq!(target.has("kept.txt"), Presence::Present);
}

#[tokio::test]
async fn file_store_rejects_a_directory_path() {
    let dir = tempfile::tempdir().unwrap();
    assert!(FileStore::new(dir.path()).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_autosaves_persist_the_latest_state() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(file_cache(&dir).await);

    let handles: Vec<_> = (0..64)
        .map(|i| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .update_record(&format!("f{i}.txt"), Attributes::default(), true)
                    .await;
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let reopened = file_cache(&dir).await;
    assert!(reopened.load().await);
    assert_eq!(reopened.len(), cache.len());
    assert_eq!(reopened.snapshot(), cache.snapshot());

    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("cache"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .filter(|name| name != "metadata.json")
        .collect();
    assert!(leftovers.is_empty(), "temporary files left behind: {leftovers:?}");
}

#[tokio::test]
async fn snapshot_from_another_scope_is_a_cold_start() {
    let dir = tempfile::tempdir().unwrap();
    let cache = file_cache(&dir).await.with_scope("/srv/a");
    cache.store_miss("x").await;

    let other = file_cache(&dir).await.with_scope("/srv/b");
    assert!(!other.load().await);
    assert!(other.is_empty());

    let unscoped = file_cache(&dir).await;
    assert!(!unscoped.load().await);

    let same = file_cache(&dir).await.with_scope("/srv/a");
    assert!(same.load().await);
    assert_eq!(same.has("x"), Presence::Absent);
}

#[tokio::test]
async fn listing_fetched_before_a_restore_is_not_stored() {
    let cache = MetadataCache::default();
    let generation = cache.generation_of("a");

    assert!(cache.restore(MetadataCache::default().snapshot()));

    let stored = cache
        .store_listing_if_current("a", vec![Record::file("a/b.txt")], false, generation)
        .await;
    assert!(stored.is_none());
    assert!(!cache.is_complete("a", false));
}

#[tokio::test]
async fn listing_is_stored_when_only_other_directories_changed() {
    let cache = MetadataCache::default();
    let generation = cache.generation_of("a");
    cache.store_miss("b/missing.txt").await;
    cache
        .update_record("c/new.txt", Attributes::default(), true)
        .await;

    let stored = cache
        .store_listing_if_current("a", vec![Record::file("a/b.txt")], false, generation)
        .await;
    assert_eq!(stored, Some(vec![Record::file("a/b.txt")]));
}
