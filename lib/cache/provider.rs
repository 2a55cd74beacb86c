//! The metadata cache provider.
//!
//! [`MetadataCache`] owns a [`CacheState`] behind one coarse lock and adds
//! persistence on top: snapshots, load/save and autosave after mutations.
//! The lock is only ever held while touching the in-memory maps. Snapshot
//! I/O runs after the guard is released, one save at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::record::{Attributes, MetadataKind, Record};
use crate::cache::snapshot::{Snapshot, SnapshotError};
use crate::cache::state::{CacheState, Completeness, Presence};
use crate::cache::store::{Ephemeral, SnapshotStore};

/// Client-side metadata cache with pluggable persistence.
///
/// Never reports "not found" as an error: existence is a [`Presence`] and
/// lookups return `Option`. The only fallible operation is an explicit
/// [`save`](Self::save).
pub struct MetadataCache<S: SnapshotStore = Ephemeral> {
    state: RwLock<CacheState>,
    store: S,
    saving: tokio::sync::Mutex<()>,
    autosave: AtomicBool,
    expire_after: Option<Duration>,
    scope: Option<String>,
}

impl Default for MetadataCache<Ephemeral> {
    fn default() -> Self {
        Self::new(Ephemeral)
    }
}

impl<S: SnapshotStore> MetadataCache<S> {
    /// Creates an empty cache persisting through `store`. Autosave is on.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            state: RwLock::new(CacheState::new()),
            store,
            saving: tokio::sync::Mutex::new(()),
            autosave: AtomicBool::new(true),
            expire_after: None,
            scope: None,
        }
    }

    /// Saved snapshots expire `ttl` after they are written.
    #[must_use]
    pub fn with_expiry(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }

    /// Tag saved snapshots with `scope`, naming the backend they describe.
    ///
    /// Snapshots tagged with a different scope, or with none, are refused on
    /// restore, so one snapshot file can never answer for another backend.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Enable or disable saving after every mutation.
    pub fn set_autosave(&self, enabled: bool) {
        self.autosave.store(enabled, Ordering::Relaxed);
    }

    /// Whether mutations are followed by a save.
    #[must_use]
    pub fn autosave_enabled(&self) -> bool {
        self.autosave.load(Ordering::Relaxed)
    }

    /// The persistence backend.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- queries ----

    /// Tri-state existence check. Only [`Presence::Unknown`] requires asking
    /// the backend.
    #[must_use]
    pub fn has(&self, path: &str) -> Presence {
        self.read().presence(path)
    }

    /// The cached record for `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Record> {
        self.read().record(path).cloned()
    }

    /// The cached record for `path`, but only if it knows `kind`.
    #[must_use]
    pub fn get_with(&self, path: &str, kind: MetadataKind) -> Option<Record> {
        self.read()
            .record(path)
            .filter(|record| record.has_field(kind))
            .cloned()
    }

    /// The cached listing of `dir`, or `None` if no complete listing of the
    /// requested depth is held.
    #[must_use]
    pub fn list_contents(&self, dir: &str, recursive: bool) -> Option<Vec<Record>> {
        self.read().list(dir, recursive)
    }

    /// Whether a listing of `dir` at the requested depth is fully cached.
    #[must_use]
    pub fn is_complete(&self, dir: &str, recursive: bool) -> bool {
        self.read().is_complete(dir, recursive)
    }

    /// The flag recorded for `dir` itself.
    #[must_use]
    pub fn completeness(&self, dir: &str) -> Option<Completeness> {
        self.read().completeness(dir)
    }

    /// Mark `dir` as listed without storing any records.
    pub fn set_complete(&self, dir: &str, recursive: bool) {
        self.write().set_complete(dir, recursive);
    }

    /// Structural generation of the listing of `dir`, used to detect
    /// changes beneath it that happened while a backend call was in flight.
    #[must_use]
    pub fn generation_of(&self, dir: &str) -> u64 {
        self.read().generation_of(dir)
    }

    /// Number of cached paths, present or absent.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // ---- mutations ----

    /// Merge `attrs` into the record for `path`.
    pub async fn update_record(&self, path: &str, attrs: Attributes, autosave: bool) {
        self.write().update(path, attrs);
        if autosave {
            self.autosave().await;
        }
    }

    /// Merge `attrs` into the record for `path` if one is cached, without
    /// creating it otherwise. Returns whether a record was updated.
    pub async fn merge_existing(&self, path: &str, attrs: Attributes) -> bool {
        let merged = self.write().merge_existing(path, &attrs);
        if merged {
            self.autosave().await;
        }
        merged
    }

    /// Remember that `path` does not exist.
    pub async fn store_miss(&self, path: &str) {
        self.write().store_miss(path);
        self.autosave().await;
    }

    /// Store a complete listing of `dir`.
    pub async fn store_listing(&self, dir: &str, records: Vec<Record>, recursive: bool) {
        self.write().store_listing(dir, records, recursive);
        self.autosave().await;
    }

    /// Store a listing only if nothing at or beneath `dir` changed
    /// structurally since [`generation_of`](Self::generation_of) returned
    /// `generation`.
    ///
    /// Returns the listing as the cache now answers it, or `None` if the
    /// listing was not stored.
    pub async fn store_listing_if_current(
        &self,
        dir: &str,
        records: Vec<Record>,
        recursive: bool,
        generation: u64,
    ) -> Option<Vec<Record>> {
        let listing = {
            let mut state = self.write();
            if state.generation_of(dir) != generation {
                debug!(dir, "cache changed during listing, not storing it");
                return None;
            }
            state.store_listing(dir, records, recursive);
            state.list(dir, recursive)
        };
        self.autosave().await;
        listing
    }

    /// Move the record at `path` (and anything beneath it) to `new_path`.
    ///
    /// No-op returning `false` if `path` is not a known record.
    pub async fn rename(&self, path: &str, new_path: &str) -> bool {
        let moved = self.write().rename(path, new_path);
        if moved {
            self.autosave().await;
        }
        moved
    }

    /// Copy the record at `path` (and anything beneath it) to `new_path`.
    ///
    /// No-op returning `false` if `path` is not a known record.
    pub async fn copy(&self, path: &str, new_path: &str) -> bool {
        let copied = self.write().copy(path, new_path);
        if copied {
            self.autosave().await;
        }
        copied
    }

    /// Record that `path` was deleted.
    pub async fn delete(&self, path: &str) {
        self.store_miss(path).await;
    }

    /// Forget `dir` and everything beneath it.
    pub async fn delete_prefix(&self, dir: &str) {
        self.write().delete_prefix(dir);
        self.autosave().await;
    }

    /// Forget everything.
    pub async fn flush(&self) {
        self.write().flush();
        info!("metadata cache flushed");
        self.autosave().await;
    }

    // ---- persistence ----

    /// Capture the current state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::capture(&self.read(), self.expire_after);
        snapshot.scope.clone_from(&self.scope);
        snapshot
    }

    /// Replace the current state with `snapshot`.
    ///
    /// Expired or invalid snapshots are dropped and the cache starts empty.
    /// Returns whether the snapshot was accepted.
    pub fn restore(&self, snapshot: Snapshot) -> bool {
        let accepted = if snapshot.is_expired() {
            info!("cache snapshot expired, starting cold");
            None
        } else if snapshot.scope != self.scope {
            info!(
                saved = ?snapshot.scope,
                current = ?self.scope,
                "cache snapshot describes another backend, starting cold"
            );
            None
        } else if let Err(e) = snapshot.validate() {
            warn!(error = %e, "discarding cache snapshot");
            None
        } else {
            Some(snapshot.into_state())
        };
        let restored = accepted.is_some();
        self.write().replace_with(accepted.unwrap_or_default());
        restored
    }

    /// Decode and restore a serialized snapshot. Undecodable input leaves an
    /// empty cache.
    pub fn restore_bytes(&self, bytes: &[u8]) -> bool {
        match Snapshot::decode(bytes) {
            Ok(snapshot) => self.restore(snapshot),
            Err(e) => {
                warn!(error = %e, "discarding undecodable cache snapshot");
                self.write().replace_with(CacheState::new());
                false
            }
        }
    }

    /// Load the saved snapshot from the store, if any.
    pub async fn load(&self) -> bool {
        match self.store.load().await {
            Ok(Some(bytes)) => {
                let restored = self.restore_bytes(&bytes);
                if restored {
                    info!(entries = self.len(), "metadata cache loaded");
                }
                restored
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "failed to read cache snapshot, starting cold");
                false
            }
        }
    }

    /// Persist the current state.
    ///
    /// Saves are serialized and each one captures the state only once it
    /// holds the save lock, so a slower save can never overwrite a newer
    /// snapshot with an older one.
    pub async fn save(&self) -> Result<(), SnapshotError> {
        let _saving = self.saving.lock().await;
        let blob = self.snapshot().encode()?;
        self.store.save(blob).await?;
        Ok(())
    }

    /// Save if autosave is on and the store persists anything. Failures are
    /// logged, never returned.
    pub async fn autosave(&self) {
        if !self.autosave_enabled() || !self.store.is_persistent() {
            return;
        }
        if let Err(e) = self.save().await {
            warn!(error = %e, "cache autosave failed");
        }
    }
}
