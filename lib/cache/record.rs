//! Cached metadata records.

use serde::{Deserialize, Serialize};

use crate::path;

/// The kind of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
}

/// Backend-neutral visibility of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Readable by anyone the backend exposes the entry to.
    Public,
    /// Readable by the owner only.
    Private,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Public => "public",
            Self::Private => "private",
        })
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(format!("unknown visibility `{other}`")),
        }
    }
}

/// The metadata fields a caller can ask for individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    /// Size in bytes.
    Size,
    /// MIME type.
    MimeType,
    /// Last modification time.
    LastModified,
    /// Visibility.
    Visibility,
}

impl std::fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Size => "size",
            Self::MimeType => "mime type",
            Self::LastModified => "last modified",
            Self::Visibility => "visibility",
        })
    }
}

/// Metadata describing a single path. Never carries file contents.
///
/// Path-derived attributes (dirname, basename, extension) are computed from
/// [`Record::path`] on demand, so they can never disagree with the key a
/// record is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Record {
    /// Normalized path of the entry.
    pub path: String,
    /// Whether this is a file or a directory.
    pub kind: EntryKind,
    /// Size in bytes. Files only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Last modification time as a unix timestamp in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
    /// MIME type as reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Visibility as reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

impl Record {
    /// A file record with no attributes known beyond its path.
    #[must_use]
    pub fn file(path: impl Into<String>) -> Self {
        Self::bare(path.into(), EntryKind::File)
    }

    /// A directory record with no attributes known beyond its path.
    #[must_use]
    pub fn directory(path: impl Into<String>) -> Self {
        Self::bare(path.into(), EntryKind::Directory)
    }

    fn bare(path: String, kind: EntryKind) -> Self {
        Self {
            path,
            kind,
            size: None,
            last_modified: None,
            mime_type: None,
            visibility: None,
        }
    }

    /// Builder-style setter for [`Record::size`].
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Builder-style setter for [`Record::last_modified`].
    #[must_use]
    pub fn with_last_modified(mut self, timestamp: i64) -> Self {
        self.last_modified = Some(timestamp);
        self
    }

    /// Builder-style setter for [`Record::mime_type`].
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Builder-style setter for [`Record::visibility`].
    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// Returns `true` if this record describes a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Normalized parent directory.
    #[must_use]
    pub fn dirname(&self) -> &str {
        path::dirname(&self.path)
    }

    /// Final path component.
    #[must_use]
    pub fn basename(&self) -> &str {
        path::basename(&self.path)
    }

    /// Extension of the final path component.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        path::extension(&self.path)
    }

    /// Returns `true` if the record knows the value of `kind`.
    #[must_use]
    pub fn has_field(&self, kind: MetadataKind) -> bool {
        match kind {
            MetadataKind::Size => self.size.is_some(),
            MetadataKind::MimeType => self.mime_type.is_some(),
            MetadataKind::LastModified => self.last_modified.is_some(),
            MetadataKind::Visibility => self.visibility.is_some(),
        }
    }

    /// Merge `attrs` into this record. Known attributes overwrite, unknown
    /// attributes leave the current value alone.
    pub fn merge(&mut self, attrs: &Attributes) {
        if let Some(kind) = attrs.kind {
            self.kind = kind;
        }
        if attrs.size.is_some() {
            self.size = attrs.size;
        }
        if attrs.last_modified.is_some() {
            self.last_modified = attrs.last_modified;
        }
        if attrs.mime_type.is_some() {
            self.mime_type.clone_from(&attrs.mime_type);
        }
        if attrs.visibility.is_some() {
            self.visibility = attrs.visibility;
        }
    }
}

/// A partial set of record attributes used to update the cache.
///
/// Every field is optional. A record created from attributes with no
/// [`Attributes::kind`] is assumed to be a file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    /// Entry kind, if known.
    pub kind: Option<EntryKind>,
    /// Size in bytes, if known.
    pub size: Option<u64>,
    /// Unix timestamp of the last modification, if known.
    pub last_modified: Option<i64>,
    /// MIME type, if known.
    pub mime_type: Option<String>,
    /// Visibility, if known.
    pub visibility: Option<Visibility>,
}

impl Attributes {
    /// Attributes carrying only a visibility.
    #[must_use]
    pub fn visibility(visibility: Visibility) -> Self {
        Self {
            visibility: Some(visibility),
            ..Self::default()
        }
    }

    /// Create a record at `path` seeded from these attributes.
    #[must_use]
    pub fn into_record(self, path: String) -> Record {
        let mut record = Record::bare(path, self.kind.unwrap_or(EntryKind::File));
        record.merge(&self);
        record
    }
}

impl From<Record> for Attributes {
    fn from(record: Record) -> Self {
        Self {
            kind: Some(record.kind),
            size: record.size,
            last_modified: record.last_modified,
            mime_type: record.mime_type,
            visibility: record.visibility,
        }
    }
}

impl From<&Record> for Attributes {
    fn from(record: &Record) -> Self {
        Self::from(record.clone())
    }
}
