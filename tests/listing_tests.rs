#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use cachedfs::cache::{MetadataCache, Presence};
use cachedfs::fs::{CachedFs, FsError, WriteOptions};

use common::counting_adapter::{CountingAdapter, Op};
use common::fs_with;

fn slow_fs(files: &[(&str, &str)], delay: Duration) -> Arc<CachedFs<CountingAdapter>> {
    let adapter = CountingAdapter::new().with_list_delay(delay);
    for (path, content) in files {
        adapter.inner.insert_file(path, content.as_bytes().to_vec());
    }
    Arc::new(CachedFs::new(adapter, MetadataCache::default()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_listings_share_one_adapter_call() {
    let fs = slow_fs(&[("a/b.txt", "b"), ("a/c.txt", "c")], Duration::from_millis(100));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let fs = Arc::clone(&fs);
            tokio::spawn(async move { fs.list_contents("a", false).await })
        })
        .collect();

    for handle in handles {
        let listing = handle.await.unwrap().unwrap();
        assert_eq!(listing.len(), 2);
    }
    assert_eq!(fs.adapter().calls(Op::ListContents), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_depths_are_listed_separately() {
    let fs = slow_fs(&[("a/b/c.txt", "c")], Duration::from_millis(50));

    let shallow = {
        let fs = Arc::clone(&fs);
        tokio::spawn(async move { fs.list_contents("a", false).await })
    };
    let deep = {
        let fs = Arc::clone(&fs);
        tokio::spawn(async move { fs.list_contents("a", true).await })
    };

    assert_eq!(shallow.await.unwrap().unwrap().len(), 1);
    assert_eq!(deep.await.unwrap().unwrap().len(), 2);
    assert_eq!(fs.adapter().calls(Op::ListContents), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_listing_caches_nothing() {
    let fs = fs_with(&[("a/b.txt", "b")]);

    fs.adapter().fail_next(Op::ListContents);
    let err = fs.list_contents("a", false).await.unwrap_err();
    assert!(matches!(err, FsError::Adapter { .. }));
    assert!(!fs.cache().is_complete("a", false));

    let listing = fs.list_contents("a", false).await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(fs.adapter().calls(Op::ListContents), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listing_a_missing_directory_caches_the_miss() {
    let fs = fs_with(&[]);

    let err = fs.list_contents("nowhere", false).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(fs.cache().has("nowhere"), Presence::Absent);

    let err = fs.list_contents("nowhere", true).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(fs.adapter().calls(Op::ListContents), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listing_a_cached_file_is_refused() {
    let fs = fs_with(&[("f.txt", "f")]);
    fs.list_contents("", false).await.unwrap();

    let err = fs.list_contents("f.txt", false).await.unwrap_err();
    assert!(matches!(err, FsError::NotADirectory(_)));
    assert_eq!(fs.adapter().calls(Op::ListContents), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn listing_is_not_stored_when_the_cache_changed_meanwhile() {
    let fs = slow_fs(&[("a/b.txt", "b")], Duration::from_millis(200));

    let listing = {
        let fs = Arc::clone(&fs);
        tokio::spawn(async move { fs.list_contents("a", false).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    fs.write("a/new.txt", "n", &WriteOptions::default())
        .await
        .unwrap();

    listing.await.unwrap().unwrap();
    assert!(
        !fs.cache().is_complete("a", false),
        "a listing that raced a write must not be marked complete"
    );
    assert_eq!(fs.cache().has("a/new.txt"), Presence::Present);

    let fresh = fs.list_contents("a", false).await.unwrap();
    let paths: Vec<&str> = fresh.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, ["a/b.txt", "a/new.txt"]);
    assert_eq!(fs.adapter().calls(Op::ListContents), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn relisting_after_a_flush_drops_vanished_entries() {
    let fs = fs_with(&[("a/b.txt", "b"), ("a/c.txt", "c")]);
    fs.list_contents("a", false).await.unwrap();

    fs.adapter().inner.remove("a/c.txt");
    fs.flush_cache().await;

    let listing = fs.list_contents("a", false).await.unwrap();
    assert_eq!(listing.len(), 1);
    assert!(!fs.has("a/c.txt").await.unwrap());
    assert_eq!(fs.adapter().calls(Op::Exists), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn root_listing_uses_the_empty_path() {
    let fs = fs_with(&[("top.txt", "t"), ("d/inner.txt", "i")]);

    let listing = fs.list_contents("/", false).await.unwrap();
    let paths: Vec<&str> = listing.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, ["d", "top.txt"]);

    fs.list_contents("", false).await.unwrap();
    fs.list_contents(".", false).await.unwrap();
    assert_eq!(fs.adapter().calls(Op::ListContents), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unrelated_changes_do_not_discard_a_listing() {
    let fs = slow_fs(&[("a/b.txt", "b")], Duration::from_millis(200));

    let listing = {
        let fs = Arc::clone(&fs);
        tokio::spawn(async move { fs.list_contents("a", false).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!fs.has("elsewhere/unrelated.txt").await.unwrap());
    fs.write("b/other.txt", "o", &WriteOptions::default())
        .await
        .unwrap();

    listing.await.unwrap().unwrap();
    assert!(fs.cache().is_complete("a", false));

    fs.list_contents("a", false).await.unwrap();
    assert_eq!(fs.adapter().calls(Op::ListContents), 1);
}
