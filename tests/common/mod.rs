#![allow(dead_code, missing_docs, clippy::unwrap_used)]

pub mod counting_adapter;

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use cachedfs::cache::{MetadataCache, SnapshotStore};
use cachedfs::fs::CachedFs;

use counting_adapter::CountingAdapter;

/// A facade over a counting in-memory adapter seeded with `files`.
pub fn fs_with(files: &[(&str, &str)]) -> CachedFs<CountingAdapter> {
    let adapter = CountingAdapter::new();
    for (path, content) in files {
        adapter.inner.insert_file(path, content.as_bytes().to_vec());
    }
    CachedFs::new(adapter, MetadataCache::default())
}

/// An in-memory snapshot store that counts saves.
#[derive(Debug, Default)]
pub struct CountingStore {
    saves: AtomicUsize,
    blob: Mutex<Option<Vec<u8>>>,
}

impl CountingStore {
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl SnapshotStore for CountingStore {
    async fn load(&self) -> Result<Option<Vec<u8>>, std::io::Error> {
        Ok(self.blob.lock().unwrap().clone())
    }

    async fn save(&self, blob: Vec<u8>) -> Result<(), std::io::Error> {
        *self.blob.lock().unwrap() = Some(blob);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
