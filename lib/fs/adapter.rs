//! The storage adapter capability contract.
//!
//! An [`Adapter`] performs the actual I/O against one backend technology.
//! It never sees the metadata cache; [`CachedFs`](super::cached_fs::CachedFs)
//! sits between the two and reflects every adapter result into the cache.
//!
//! All paths handed to an adapter are normalized (see [`crate::path`]):
//! relative to the adapter's root, forward-slash separated, with the empty
//! string naming the root. Records returned by an adapter must use the same
//! convention.
//!
//! Adapters report failures as [`std::io::Error`]. An error of kind
//! [`NotFound`](std::io::ErrorKind::NotFound) or
//! [`AlreadyExists`](std::io::ErrorKind::AlreadyExists) is given its typed
//! meaning by the facade; any other kind is treated as an I/O failure.

use std::future::Future;

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt as _, TryStreamExt as _};

use crate::cache::record::{Record, Visibility};

/// A stream of file content chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Content handed to [`Adapter::write`] and [`Adapter::update`].
pub enum Content {
    /// The whole body, in memory.
    Bytes(Bytes),
    /// A body produced incrementally.
    Stream(ByteStream),
}

impl Content {
    /// Collect the content into a single buffer.
    pub async fn into_bytes(self) -> Result<Bytes, std::io::Error> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Stream(stream) => {
                let buf = stream
                    .try_fold(BytesMut::new(), |mut buf, chunk| async move {
                        buf.extend_from_slice(&chunk);
                        Ok::<_, std::io::Error>(buf)
                    })
                    .await?;
                Ok(buf.freeze())
            }
        }
    }

    /// The exact length, if known without consuming a stream.
    #[must_use]
    pub fn known_len(&self) -> Option<u64> {
        match self {
            Self::Bytes(bytes) => Some(bytes.len() as u64),
            Self::Stream(_) => None,
        }
    }
}

impl std::fmt::Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for Content {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Content {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Content {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(bytes))
    }
}

impl From<&'static str> for Content {
    fn from(text: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<ByteStream> for Content {
    fn from(stream: ByteStream) -> Self {
        Self::Stream(stream)
    }
}

/// Options for writes and directory creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Visibility to apply to the new entry.
    pub visibility: Option<Visibility>,
    /// MIME type to record, for backends that store one.
    pub mime_type: Option<String>,
}

impl WriteOptions {
    /// Options requesting `visibility`.
    #[must_use]
    pub fn with_visibility(visibility: Visibility) -> Self {
        Self {
            visibility: Some(visibility),
            ..Self::default()
        }
    }
}

/// A storage backend.
pub trait Adapter: Send + Sync + 'static {
    /// Check whether `path` exists, returning whatever metadata the check
    /// produced. The record must at least carry the entry kind.
    ///
    /// The default implementation calls [`stat`](Self::stat) and maps
    /// `NotFound` to `None`.
    fn exists(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<Record>, std::io::Error>> + Send {
        async move {
            match self.stat(path).await {
                Ok(record) => Ok(Some(record)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            }
        }
    }

    /// Fetch the metadata of `path`.
    fn stat(&self, path: &str) -> impl Future<Output = Result<Record, std::io::Error>> + Send;

    /// Read the whole file at `path`.
    fn read(&self, path: &str) -> impl Future<Output = Result<Bytes, std::io::Error>> + Send;

    /// Open the file at `path` as a stream.
    ///
    /// The default implementation reads the whole file and yields it as a
    /// single chunk.
    fn read_stream(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<ByteStream, std::io::Error>> + Send {
        async move {
            let bytes = self.read(path).await?;
            Ok(futures::stream::once(async move { Ok::<_, std::io::Error>(bytes) }).boxed())
        }
    }

    /// Create a new file.
    fn write(
        &self,
        path: &str,
        content: Content,
        options: &WriteOptions,
    ) -> impl Future<Output = Result<Record, std::io::Error>> + Send;

    /// Replace the content of an existing file.
    fn update(
        &self,
        path: &str,
        content: Content,
        options: &WriteOptions,
    ) -> impl Future<Output = Result<Record, std::io::Error>> + Send;

    /// Delete a file.
    fn delete(&self, path: &str) -> impl Future<Output = Result<(), std::io::Error>> + Send;

    /// Delete a directory and everything beneath it.
    fn delete_directory(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<(), std::io::Error>> + Send;

    /// Create a directory, including missing parents.
    fn create_directory(
        &self,
        path: &str,
        options: &WriteOptions,
    ) -> impl Future<Output = Result<Record, std::io::Error>> + Send;

    /// Move `path` to `new_path`.
    fn rename(
        &self,
        path: &str,
        new_path: &str,
    ) -> impl Future<Output = Result<(), std::io::Error>> + Send;

    /// Copy the file at `path` to `new_path`.
    fn copy(
        &self,
        path: &str,
        new_path: &str,
    ) -> impl Future<Output = Result<(), std::io::Error>> + Send;

    /// List the entries beneath `path`: direct children, or every
    /// descendant when `recursive` is set. Directories are included.
    ///
    /// Calling it again restarts the listing from scratch.
    fn list_contents(
        &self,
        path: &str,
        recursive: bool,
    ) -> impl Future<Output = Result<Vec<Record>, std::io::Error>> + Send;

    /// Change the visibility of `path`.
    fn set_visibility(
        &self,
        path: &str,
        visibility: Visibility,
    ) -> impl Future<Output = Result<(), std::io::Error>> + Send;
}
