use thiserror::Error;

use crate::cache::record::MetadataKind;
use crate::path::PathOutsideRoot;

/// Errors surfaced by [`CachedFs`](super::cached_fs::CachedFs).
#[derive(Debug, Error)]
pub enum FsError {
    /// The path does not exist.
    #[error("File not found at path: {0}")]
    NotFound(String),

    /// The path exists but the operation requires it not to.
    #[error("File already exists at path: {0}")]
    AlreadyExists(String),

    /// A directory operation was applied to a file.
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// A file operation was applied to a directory.
    #[error("Is a directory: {0}")]
    IsADirectory(String),

    /// The operation would delete, move or replace the root.
    #[error("The root directory can not be deleted, moved or replaced")]
    RootViolation,

    /// The path escapes the root through `..`.
    #[error(transparent)]
    PathOutsideRoot(#[from] PathOutsideRoot),

    /// Neither the cache nor the adapter can supply the requested field.
    #[error("The {kind} of {path} is not available")]
    MetadataUnavailable {
        /// The entry asked about.
        path: String,
        /// The missing field.
        kind: MetadataKind,
    },

    /// The adapter failed for a reason other than a missing or existing path.
    #[error("Adapter failed on {path}: {source}")]
    Adapter {
        /// The path the adapter was working on.
        path: String,
        /// The adapter's error.
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    /// Give an adapter error its typed meaning.
    pub(crate) fn from_adapter(path: &str, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_owned()),
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists(path.to_owned()),
            _ => Self::Adapter {
                path: path.to_owned(),
                source,
            },
        }
    }

    /// Returns `true` for [`FsError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
