//! The caching filesystem facade.

use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::cache::provider::MetadataCache;
use crate::cache::record::{Attributes, EntryKind, MetadataKind, Record, Visibility};
use crate::cache::state::Presence;
use crate::cache::store::{Ephemeral, SnapshotStore};
use crate::fs::adapter::{Adapter, ByteStream, Content, WriteOptions};
use crate::fs::error::FsError;
use crate::fs::listing_gate::{Claim, ListingGate};
use crate::path;

/// A filesystem backed by an [`Adapter`], fronted by a [`MetadataCache`].
///
/// Every read consults the cache first. Every mutation is performed against
/// the adapter first and only reflected into the cache once the adapter has
/// confirmed it, before the call returns. A failed adapter call leaves the
/// cache exactly as it was.
///
/// Paths are normalized on the way in; `"a/b.txt"`, `"/a/b.txt"` and
/// `"a/./b.txt"` name the same entry.
pub struct CachedFs<A: Adapter, S: SnapshotStore = Ephemeral> {
    adapter: A,
    cache: MetadataCache<S>,
    listings: ListingGate,
}

impl<A: Adapter> CachedFs<A> {
    /// Front `adapter` with an in-memory cache that is never persisted.
    #[must_use]
    pub fn ephemeral(adapter: A) -> Self {
        Self::new(adapter, MetadataCache::default())
    }
}

impl<A: Adapter, S: SnapshotStore> CachedFs<A, S> {
    /// Front `adapter` with `cache`.
    #[must_use]
    pub fn new(adapter: A, cache: MetadataCache<S>) -> Self {
        Self {
            adapter,
            cache,
            listings: ListingGate::new(),
        }
    }

    /// The wrapped adapter.
    #[must_use]
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// The metadata cache.
    #[must_use]
    pub fn cache(&self) -> &MetadataCache<S> {
        &self.cache
    }

    /// Check whether `path` exists.
    ///
    /// Answered from the cache when it knows; otherwise the adapter is asked
    /// and the answer, positive or negative, is cached.
    #[instrument(name = "CachedFs::has", skip(self))]
    pub async fn has(&self, path: &str) -> Result<bool, FsError> {
        let path = path::normalize(path)?;
        self.exists(&path).await
    }

    async fn exists(&self, path: &str) -> Result<bool, FsError> {
        match self.cache.has(path) {
            Presence::Present => Ok(true),
            Presence::Absent => {
                debug!(path, "known absent");
                Ok(false)
            }
            Presence::Unknown => {
                let found = self
                    .adapter
                    .exists(path)
                    .await
                    .map_err(|e| FsError::from_adapter(path, e))?;
                if let Some(record) = found {
                    self.cache.update_record(path, record.into(), true).await;
                    Ok(true)
                } else {
                    self.cache.store_miss(path).await;
                    Ok(false)
                }
            }
        }
    }

    /// Map an adapter failure on a read-type call. A "not found" answer is
    /// remembered as an absence marker.
    async fn read_failure(&self, path: &str, source: std::io::Error) -> FsError {
        let error = FsError::from_adapter(path, source);
        if error.is_not_found() {
            debug!(path, "adapter reports missing entry, caching the miss");
            self.cache.store_miss(path).await;
        }
        error
    }

    /// Fail fast on paths the cache already knows cannot be read as a file.
    fn check_readable(&self, path: &str) -> Result<(), FsError> {
        match self.cache.has(path) {
            Presence::Absent => Err(FsError::NotFound(path.to_owned())),
            _ if path::is_root(path) => Err(FsError::IsADirectory(path.to_owned())),
            _ => match self.cache.get(path) {
                Some(record) if record.is_dir() => Err(FsError::IsADirectory(path.to_owned())),
                _ => Ok(()),
            },
        }
    }

    /// Read the whole file at `path`.
    #[instrument(name = "CachedFs::read", skip(self))]
    pub async fn read(&self, path: &str) -> Result<Bytes, FsError> {
        let path = path::normalize(path)?;
        self.check_readable(&path)?;
        match self.adapter.read(&path).await {
            Ok(bytes) => {
                let attrs = Attributes {
                    kind: Some(EntryKind::File),
                    size: Some(bytes.len() as u64),
                    ..Attributes::default()
                };
                self.cache.update_record(&path, attrs, true).await;
                Ok(bytes)
            }
            Err(e) => Err(self.read_failure(&path, e).await),
        }
    }

    /// Open the file at `path` as a stream of chunks.
    #[instrument(name = "CachedFs::read_stream", skip(self))]
    pub async fn read_stream(&self, path: &str) -> Result<ByteStream, FsError> {
        let path = path::normalize(path)?;
        self.check_readable(&path)?;
        match self.adapter.read_stream(&path).await {
            Ok(stream) => {
                let attrs = Attributes {
                    kind: Some(EntryKind::File),
                    ..Attributes::default()
                };
                self.cache.update_record(&path, attrs, true).await;
                Ok(stream)
            }
            Err(e) => Err(self.read_failure(&path, e).await),
        }
    }

    /// Create a new file at `path`. Fails with [`FsError::AlreadyExists`] if
    /// the path exists.
    #[instrument(name = "CachedFs::write", skip(self, content, options))]
    pub async fn write(
        &self,
        path: &str,
        content: impl Into<Content>,
        options: &WriteOptions,
    ) -> Result<Record, FsError> {
        let path = path::normalize(path)?;
        let content = content.into();
        if path::is_root(&path) {
            return Err(FsError::IsADirectory(path));
        }
        if self.exists(&path).await? {
            return Err(FsError::AlreadyExists(path));
        }
        let known_len = content.known_len();
        let record = self
            .adapter
            .write(&path, content, options)
            .await
            .map_err(|e| FsError::from_adapter(&path, e))?;
        self.commit_write(&path, record, known_len, options).await
    }

    /// Create a new file at `path` from a stream.
    pub async fn write_stream(
        &self,
        path: &str,
        stream: ByteStream,
        options: &WriteOptions,
    ) -> Result<Record, FsError> {
        self.write(path, stream, options).await
    }

    /// Replace the content of the existing file at `path`.
    #[instrument(name = "CachedFs::update", skip(self, content, options))]
    pub async fn update(
        &self,
        path: &str,
        content: impl Into<Content>,
        options: &WriteOptions,
    ) -> Result<Record, FsError> {
        let path = path::normalize(path)?;
        let content = content.into();
        if !self.exists(&path).await? {
            return Err(FsError::NotFound(path));
        }
        if self.cache.get(&path).is_some_and(|record| record.is_dir()) {
            return Err(FsError::IsADirectory(path));
        }
        let known_len = content.known_len();
        let record = self
            .adapter
            .update(&path, content, options)
            .await
            .map_err(|e| FsError::from_adapter(&path, e))?;
        self.commit_write(&path, record, known_len, options).await
    }

    /// Replace the content of the existing file at `path` from a stream.
    pub async fn update_stream(
        &self,
        path: &str,
        stream: ByteStream,
        options: &WriteOptions,
    ) -> Result<Record, FsError> {
        self.update(path, stream, options).await
    }

    /// Write `content` to `path`, creating the file or replacing it.
    #[instrument(name = "CachedFs::put", skip(self, content, options))]
    pub async fn put(
        &self,
        path: &str,
        content: impl Into<Content>,
        options: &WriteOptions,
    ) -> Result<Record, FsError> {
        let normalized = path::normalize(path)?;
        let content = content.into();
        if self.exists(&normalized).await? {
            self.update(&normalized, content, options).await
        } else {
            self.write(&normalized, content, options).await
        }
    }

    /// Reflect a confirmed write into the cache. Attributes the adapter did
    /// not report are filled in from what the caller asked for.
    async fn commit_write(
        &self,
        path: &str,
        record: Record,
        known_len: Option<u64>,
        options: &WriteOptions,
    ) -> Result<Record, FsError> {
        let mut attrs = Attributes::from(record);
        attrs.kind = Some(EntryKind::File);
        attrs.size = attrs.size.or(known_len);
        attrs.visibility = attrs.visibility.or(options.visibility);
        if attrs.mime_type.is_none() {
            attrs.mime_type.clone_from(&options.mime_type);
        }
        let record = attrs.clone().into_record(path.to_owned());
        self.cache.update_record(path, attrs, true).await;
        Ok(record)
    }

    /// Delete the file at `path`.
    #[instrument(name = "CachedFs::delete", skip(self))]
    pub async fn delete(&self, path: &str) -> Result<(), FsError> {
        let path = path::normalize(path)?;
        if !self.exists(&path).await? {
            return Err(FsError::NotFound(path));
        }
        if path::is_root(&path) || self.cache.get(&path).is_some_and(|record| record.is_dir()) {
            return Err(FsError::IsADirectory(path));
        }
        self.adapter
            .delete(&path)
            .await
            .map_err(|e| FsError::from_adapter(&path, e))?;
        self.cache.delete(&path).await;
        Ok(())
    }

    /// Delete the directory at `path` and everything beneath it.
    ///
    /// Afterwards the directory and all of its former descendants are known
    /// to be absent.
    #[instrument(name = "CachedFs::delete_directory", skip(self))]
    pub async fn delete_directory(&self, path: &str) -> Result<(), FsError> {
        let path = path::normalize(path)?;
        if path::is_root(&path) {
            return Err(FsError::RootViolation);
        }
        if self.cache.get(&path).is_some_and(|record| !record.is_dir()) {
            return Err(FsError::NotADirectory(path));
        }
        self.adapter
            .delete_directory(&path)
            .await
            .map_err(|e| FsError::from_adapter(&path, e))?;
        self.cache.store_miss(&path).await;
        Ok(())
    }

    /// Create a directory at `path`, including missing parents.
    #[instrument(name = "CachedFs::create_directory", skip(self, options))]
    pub async fn create_directory(
        &self,
        path: &str,
        options: &WriteOptions,
    ) -> Result<Record, FsError> {
        let path = path::normalize(path)?;
        if self.cache.get(&path).is_some_and(|record| !record.is_dir()) {
            return Err(FsError::AlreadyExists(path));
        }
        let record = self
            .adapter
            .create_directory(&path, options)
            .await
            .map_err(|e| FsError::from_adapter(&path, e))?;
        let mut attrs = Attributes::from(record);
        attrs.kind = Some(EntryKind::Directory);
        attrs.visibility = attrs.visibility.or(options.visibility);
        self.cache.update_record(&path, attrs.clone(), true).await;
        Ok(attrs.into_record(path))
    }

    /// Check the preconditions shared by rename and copy, returning both
    /// paths normalized.
    async fn check_transfer(&self, from: &str, to: &str) -> Result<(String, String), FsError> {
        let from = path::normalize(from)?;
        let to = path::normalize(to)?;
        if path::is_root(&from) || path::is_root(&to) {
            return Err(FsError::RootViolation);
        }
        if !self.exists(&from).await? {
            return Err(FsError::NotFound(from));
        }
        if self.exists(&to).await? {
            return Err(FsError::AlreadyExists(to));
        }
        Ok((from, to))
    }

    /// Move `path` to `new_path`. The target must not exist.
    #[instrument(name = "CachedFs::rename", skip(self))]
    pub async fn rename(&self, path: &str, new_path: &str) -> Result<(), FsError> {
        let (from, to) = self.check_transfer(path, new_path).await?;
        self.adapter
            .rename(&from, &to)
            .await
            .map_err(|e| FsError::from_adapter(&from, e))?;
        if !self.cache.rename(&from, &to).await {
            // The source record vanished from the cache while the adapter
            // was working; only the outcome for the source is certain.
            warn!(%from, %to, "renamed entry no longer cached");
            self.cache.store_miss(&from).await;
            self.cache.delete_prefix(&to).await;
        }
        Ok(())
    }

    /// Copy `path` to `new_path`. The target must not exist.
    #[instrument(name = "CachedFs::copy", skip(self))]
    pub async fn copy(&self, path: &str, new_path: &str) -> Result<(), FsError> {
        let (from, to) = self.check_transfer(path, new_path).await?;
        self.adapter
            .copy(&from, &to)
            .await
            .map_err(|e| FsError::from_adapter(&from, e))?;
        if !self.cache.copy(&from, &to).await {
            warn!(%from, %to, "copied entry no longer cached");
            self.cache.delete_prefix(&to).await;
        }
        Ok(())
    }

    /// List the entries beneath `dir`: direct children, or the whole
    /// subtree when `recursive` is set.
    ///
    /// Served from the cache when it holds a complete listing of the
    /// requested depth. Otherwise the adapter is asked, and concurrent
    /// callers asking for the same listing share that one adapter call.
    #[instrument(name = "CachedFs::list_contents", skip(self))]
    pub async fn list_contents(&self, dir: &str, recursive: bool) -> Result<Vec<Record>, FsError> {
        let dir = path::normalize(dir)?;
        if self.cache.has(&dir) == Presence::Absent {
            return Err(FsError::NotFound(dir));
        }
        if self.cache.get(&dir).is_some_and(|record| !record.is_dir()) {
            return Err(FsError::NotADirectory(dir));
        }

        loop {
            if let Some(listing) = self.cache.list_contents(&dir, recursive) {
                debug!(entries = listing.len(), "listing served from cache");
                return Ok(listing);
            }

            match self.listings.try_claim(&dir, recursive) {
                Claim::Claimed(_claim) => {
                    let generation = self.cache.generation_of(&dir);
                    let records = match self.adapter.list_contents(&dir, recursive).await {
                        Ok(records) => normalize_listing(&dir, records, recursive),
                        Err(e) => return Err(self.read_failure(&dir, e).await),
                    };
                    let stored = self
                        .cache
                        .store_listing_if_current(&dir, records.clone(), recursive, generation)
                        .await;
                    return Ok(stored.unwrap_or(records));
                }
                Claim::InProgress(waiter) => {
                    waiter.wait().await;
                    // The lister may have failed or lost the generation race;
                    // re-check the cache and claim again if needed.
                }
            }
        }
    }

    /// All cached or fetched metadata of `path`.
    #[instrument(name = "CachedFs::get_metadata", skip(self))]
    pub async fn get_metadata(&self, path: &str) -> Result<Record, FsError> {
        let path = path::normalize(path)?;
        if path::is_root(&path) {
            return Ok(Record::directory(path));
        }
        if self.cache.has(&path) == Presence::Absent {
            return Err(FsError::NotFound(path));
        }
        if let Some(record) = self.cache.get(&path) {
            return Ok(record);
        }
        self.stat(&path).await
    }

    /// Ask the adapter for the metadata of `path` and cache it.
    async fn stat(&self, path: &str) -> Result<Record, FsError> {
        match self.adapter.stat(path).await {
            Ok(mut record) => {
                record.path = path.to_owned();
                self.cache.update_record(path, (&record).into(), true).await;
                Ok(self.cache.get(path).unwrap_or(record))
            }
            Err(e) => Err(self.read_failure(path, e).await),
        }
    }

    /// A record for `path` that knows `kind`, from the cache if possible.
    async fn metadata_with(&self, path: &str, kind: MetadataKind) -> Result<Record, FsError> {
        let path = path::normalize(path)?;
        if self.cache.has(&path) == Presence::Absent {
            return Err(FsError::NotFound(path));
        }
        if let Some(record) = self.cache.get_with(&path, kind) {
            return Ok(record);
        }
        let record = self.stat(&path).await?;
        if record.has_field(kind) {
            Ok(record)
        } else {
            Err(FsError::MetadataUnavailable { path, kind })
        }
    }

    /// Size of the file at `path` in bytes.
    #[instrument(name = "CachedFs::get_size", skip(self))]
    pub async fn get_size(&self, path: &str) -> Result<u64, FsError> {
        let record = self.metadata_with(path, MetadataKind::Size).await?;
        record.size.ok_or_else(|| unavailable(record.path, MetadataKind::Size))
    }

    /// MIME type of the file at `path`.
    #[instrument(name = "CachedFs::get_mime_type", skip(self))]
    pub async fn get_mime_type(&self, path: &str) -> Result<String, FsError> {
        let record = self.metadata_with(path, MetadataKind::MimeType).await?;
        record
            .mime_type
            .ok_or_else(|| unavailable(record.path, MetadataKind::MimeType))
    }

    /// Last modification time of `path` as a unix timestamp in seconds.
    #[instrument(name = "CachedFs::get_timestamp", skip(self))]
    pub async fn get_timestamp(&self, path: &str) -> Result<i64, FsError> {
        let record = self.metadata_with(path, MetadataKind::LastModified).await?;
        record
            .last_modified
            .ok_or_else(|| unavailable(record.path, MetadataKind::LastModified))
    }

    /// Visibility of `path`.
    #[instrument(name = "CachedFs::get_visibility", skip(self))]
    pub async fn get_visibility(&self, path: &str) -> Result<Visibility, FsError> {
        let record = self.metadata_with(path, MetadataKind::Visibility).await?;
        record
            .visibility
            .ok_or_else(|| unavailable(record.path, MetadataKind::Visibility))
    }

    /// Change the visibility of `path`.
    #[instrument(name = "CachedFs::set_visibility", skip(self))]
    pub async fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<(), FsError> {
        let path = path::normalize(path)?;
        if self.cache.has(&path) == Presence::Absent {
            return Err(FsError::NotFound(path));
        }
        self.adapter
            .set_visibility(&path, visibility)
            .await
            .map_err(|e| FsError::from_adapter(&path, e))?;
        // Without a cached record the entry kind is unknown; leave the path
        // for the next lookup to fetch rather than guess.
        self.cache
            .merge_existing(&path, Attributes::visibility(visibility))
            .await;
        Ok(())
    }

    /// Forget everything the cache knows.
    pub async fn flush_cache(&self) {
        self.cache.flush().await;
    }
}

fn unavailable(path: String, kind: MetadataKind) -> FsError {
    FsError::MetadataUnavailable { path, kind }
}

/// Normalize the paths of a backend listing, dropping anything the backend
/// reported outside the listed directory, and sort it the way cached
/// listings are ordered.
///
/// Recursive listings gain a directory record for every intermediate
/// directory the backend only reported implicitly, matching what the cache
/// answers once the listing is stored.
fn normalize_listing(dir: &str, records: Vec<Record>, recursive: bool) -> Vec<Record> {
    let mut listing: Vec<Record> = records
        .into_iter()
        .filter_map(|mut record| match path::normalize(&record.path) {
            Ok(normalized) if path::is_descendant(dir, &normalized) => {
                if !recursive && path::dirname(&normalized) != dir {
                    warn!(path = %normalized, "ignoring nested entry in shallow listing");
                    return None;
                }
                record.path = normalized;
                Some(record)
            }
            _ => {
                warn!(path = %record.path, "ignoring listed entry outside {dir:?}");
                None
            }
        })
        .collect();
    if recursive {
        let implicit: Vec<Record> = listing
            .iter()
            .flat_map(|record| path::ancestors(&record.path))
            .filter(|ancestor| path::is_descendant(dir, ancestor))
            .map(Record::directory)
            .collect();
        listing.extend(implicit);
    }
    listing.sort_by(|a, b| a.path.cmp(&b.path));
    listing.dedup_by(|a, b| a.path == b.path);
    listing
}
