//! Persistence backends for cache snapshots.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

/// A place to keep the serialized cache between runs.
///
/// Stores deal in opaque bytes. Encoding, validation and expiry are handled
/// by [`MetadataCache`](crate::cache::provider::MetadataCache), so a store
/// never needs to understand what it holds.
pub trait SnapshotStore: Send + Sync + 'static {
    /// Load the most recently saved blob, or `None` if nothing was saved.
    fn load(&self) -> impl Future<Output = Result<Option<Vec<u8>>, std::io::Error>> + Send;

    /// Replace the saved blob.
    fn save(&self, blob: Vec<u8>) -> impl Future<Output = Result<(), std::io::Error>> + Send;

    /// Returns `true` if saving actually persists anything. Autosave is
    /// skipped entirely for stores that do not.
    fn is_persistent(&self) -> bool {
        true
    }
}

/// A store that keeps nothing. The cache lives and dies with the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ephemeral;

impl SnapshotStore for Ephemeral {
    async fn load(&self) -> Result<Option<Vec<u8>>, std::io::Error> {
        Ok(None)
    }

    async fn save(&self, _blob: Vec<u8>) -> Result<(), std::io::Error> {
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

/// Reasons a [`FileStore`] cannot use a path.
#[derive(Debug, Error)]
pub enum InvalidStorePathError {
    /// The path names an existing directory.
    #[error("Snapshot path is a directory: {0}")]
    IsADirectory(PathBuf),

    /// The path has no file name to write to.
    #[error("Snapshot path has no parent directory: {0}")]
    NoParentDir(PathBuf),

    /// The parent directory could not be created or inspected.
    #[error("IO error while preparing snapshot path: {0}")]
    Io(#[from] std::io::Error),
}

/// A store backed by a single file.
///
/// Saves go through a sibling temporary file followed by a rename, so a
/// crash mid-save leaves either the previous snapshot or the new one. Every
/// save gets its own temporary file; concurrent savers never share one.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Suffix of the temporary file written during a save.
    const TMP_SUFFIX: &'static str = "tmp";

    /// Open a store at `path`, creating its parent directory if needed.
    ///
    /// The file itself need not exist yet.
    pub async fn new(path: &Path) -> Result<Self, InvalidStorePathError> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        if path.file_name().is_none() {
            return Err(InvalidStorePathError::NoParentDir(path.to_path_buf()));
        }
        tokio::fs::create_dir_all(&parent).await?;

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => {
                return Err(InvalidStorePathError::IsADirectory(path.to_path_buf()));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// The file this store reads and writes.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A temporary path next to the snapshot, unique per call.
    fn tmp_path(&self) -> PathBuf {
        static NEXT_SAVE: AtomicU64 = AtomicU64::new(0);
        let seq = NEXT_SAVE.fetch_add(1, Ordering::Relaxed);
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}.{seq}.{}", std::process::id(), Self::TMP_SUFFIX));
        PathBuf::from(name)
    }
}

impl SnapshotStore for FileStore {
    async fn load(&self) -> Result<Option<Vec<u8>>, std::io::Error> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn save(&self, blob: Vec<u8>) -> Result<(), std::io::Error> {
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, blob).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }
}
