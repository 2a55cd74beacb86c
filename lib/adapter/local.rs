//! Local disk storage adapter.
//!
//! All paths are relative to a root directory. Visibility maps onto Unix
//! permission bits: public files are `0644` and private files `0600`,
//! public directories `0755` and private directories `0700`. On other
//! platforms visibility is reported as public and changes are ignored.

use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt as _};
use tokio::fs;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tracing::{debug, warn};

use crate::cache::record::{EntryKind, Record, Visibility};
use crate::fs::adapter::{Adapter, ByteStream, Content, WriteOptions};
use crate::path;

/// Chunk size of [`LocalAdapter::read_stream`].
const READ_CHUNK: usize = 64 * 1024;

#[cfg(unix)]
fn mode_for(kind: EntryKind, visibility: Visibility) -> u32 {
    match (kind, visibility) {
        (EntryKind::File, Visibility::Public) => 0o644,
        (EntryKind::File, Visibility::Private) => 0o600,
        (EntryKind::Directory, Visibility::Public) => 0o755,
        (EntryKind::Directory, Visibility::Private) => 0o700,
    }
}

#[cfg(unix)]
fn visibility_of(meta: &std::fs::Metadata) -> Visibility {
    use std::os::unix::fs::PermissionsExt as _;
    if meta.permissions().mode() & 0o044 == 0 {
        Visibility::Private
    } else {
        Visibility::Public
    }
}

#[cfg(not(unix))]
fn visibility_of(_meta: &std::fs::Metadata) -> Visibility {
    Visibility::Public
}

fn record_from(path: &str, meta: &std::fs::Metadata) -> Record {
    let mut record = if meta.is_dir() {
        Record::directory(path)
    } else {
        Record::file(path).with_size(meta.len())
    };
    if let Some(modified) = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| i64::try_from(d.as_secs()).ok())
    {
        record = record.with_last_modified(modified);
    }
    record.with_visibility(visibility_of(meta))
}

/// An adapter storing entries beneath a directory on the local disk.
#[derive(Debug, Clone)]
pub struct LocalAdapter {
    root: PathBuf,
}

impl LocalAdapter {
    /// Create an adapter rooted at `root`. The directory must exist.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a normalized path onto the disk.
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        match path::normalize(path) {
            Ok(normalized) if normalized == path => Ok(self.root.join(path)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a normalized path: {path}"),
            )),
        }
    }

    /// Map a path on disk back to a normalized path, if it lies beneath the
    /// root and is valid UTF-8.
    fn relative(&self, full: &Path) -> Option<String> {
        let rel = full.strip_prefix(&self.root).ok()?;
        let Some(rel) = rel.to_str() else {
            warn!(path = %full.display(), "skipping non UTF-8 path");
            return None;
        };
        path::normalize(rel).ok()
    }

    async fn apply_visibility(
        full: &Path,
        kind: EntryKind,
        visibility: Option<Visibility>,
    ) -> io::Result<()> {
        let Some(visibility) = visibility else {
            return Ok(());
        };
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            let perms = std::fs::Permissions::from_mode(mode_for(kind, visibility));
            fs::set_permissions(full, perms).await?;
        }
        #[cfg(not(unix))]
        {
            let _ = (full, kind, visibility);
        }
        Ok(())
    }

    async fn write_content(full: &Path, content: Content) -> io::Result<()> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        match content {
            Content::Bytes(bytes) => fs::write(full, &bytes).await,
            Content::Stream(mut chunks) => {
                let mut file = fs::File::create(full).await?;
                while let Some(chunk) = chunks.next().await {
                    file.write_all(&chunk?).await?;
                }
                file.flush().await
            }
        }
    }

    async fn stat_full(&self, path: &str, full: &Path) -> io::Result<Record> {
        let meta = fs::metadata(full).await?;
        Ok(record_from(path, &meta))
    }

    /// Walk `dir`, visiting direct children only unless `recursive`.
    async fn walk(&self, dir: &str, recursive: bool) -> io::Result<Vec<Record>> {
        let full = self.resolve(dir)?;
        if !fs::metadata(&full).await?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("not a directory: {dir}"),
            ));
        }
        let mut records = Vec::new();
        let mut pending = vec![full];
        while let Some(current) = pending.pop() {
            let mut entries = fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                let Some(rel) = self.relative(&entry_path) else {
                    continue;
                };
                let meta = entry.metadata().await?;
                if recursive && meta.is_dir() {
                    pending.push(entry_path);
                }
                records.push(record_from(&rel, &meta));
            }
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(records)
    }
}

impl Adapter for LocalAdapter {
    async fn stat(&self, path: &str) -> io::Result<Record> {
        let full = self.resolve(path)?;
        self.stat_full(path, &full).await
    }

    async fn read(&self, path: &str) -> io::Result<Bytes> {
        let full = self.resolve(path)?;
        Ok(Bytes::from(fs::read(&full).await?))
    }

    async fn read_stream(&self, path: &str) -> io::Result<ByteStream> {
        let full = self.resolve(path)?;
        let file = fs::File::open(&full).await?;
        let chunks = stream::try_unfold(file, |mut file| async move {
            let mut buf = BytesMut::with_capacity(READ_CHUNK);
            let read = file.read_buf(&mut buf).await?;
            if read == 0 {
                Ok::<_, io::Error>(None)
            } else {
                Ok(Some((buf.freeze(), file)))
            }
        });
        Ok(chunks.boxed())
    }

    async fn write(&self, path: &str, content: Content, options: &WriteOptions) -> io::Result<Record> {
        let full = self.resolve(path)?;
        if fs::metadata(&full).await.is_ok_and(|meta| meta.is_dir()) {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("is a directory: {path}"),
            ));
        }
        Self::write_content(&full, content).await?;
        Self::apply_visibility(&full, EntryKind::File, options.visibility).await?;
        debug!(path, "wrote file");
        self.stat_full(path, &full).await
    }

    async fn update(&self, path: &str, content: Content, options: &WriteOptions) -> io::Result<Record> {
        let full = self.resolve(path)?;
        if fs::metadata(&full).await?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("is a directory: {path}"),
            ));
        }
        Self::write_content(&full, content).await?;
        Self::apply_visibility(&full, EntryKind::File, options.visibility).await?;
        self.stat_full(path, &full).await
    }

    async fn delete(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.resolve(path)?).await
    }

    async fn delete_directory(&self, path: &str) -> io::Result<()> {
        fs::remove_dir_all(self.resolve(path)?).await
    }

    async fn create_directory(&self, path: &str, options: &WriteOptions) -> io::Result<Record> {
        let full = self.resolve(path)?;
        fs::create_dir_all(&full).await?;
        Self::apply_visibility(&full, EntryKind::Directory, options.visibility).await?;
        self.stat_full(path, &full).await
    }

    async fn rename(&self, path: &str, new_path: &str) -> io::Result<()> {
        let from = self.resolve(path)?;
        let to = self.resolve(new_path)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&from, &to).await
    }

    async fn copy(&self, path: &str, new_path: &str) -> io::Result<()> {
        let from = self.resolve(path)?;
        let to = self.resolve(new_path)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        if !fs::metadata(&from).await?.is_dir() {
            fs::copy(&from, &to).await?;
            return Ok(());
        }
        fs::create_dir_all(&to).await?;
        for record in self.walk(path, true).await? {
            let target = self.resolve(&path::rebase(&record.path, path, new_path))?;
            if record.is_dir() {
                fs::create_dir_all(&target).await?;
            } else {
                fs::copy(self.resolve(&record.path)?, &target).await?;
            }
        }
        Ok(())
    }

    async fn list_contents(&self, path: &str, recursive: bool) -> io::Result<Vec<Record>> {
        self.walk(path, recursive).await
    }

    async fn set_visibility(&self, path: &str, visibility: Visibility) -> io::Result<()> {
        let full = self.resolve(path)?;
        let kind = if fs::metadata(&full).await?.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        Self::apply_visibility(&full, kind, Some(visibility)).await
    }
}
