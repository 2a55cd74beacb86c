//! Serializable image of a [`CacheState`].
//!
//! A snapshot is a flat map: records are keyed by path and never point at
//! each other, so it serializes without any graph handling. Records carry no
//! file contents by construction.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::state::{CacheState, Completeness, Entry};
use crate::cache::record::Record;
use crate::path;

/// Current snapshot layout version. Snapshots with any other version are
/// discarded on restore.
pub const FORMAT_VERSION: u32 = 1;

/// Errors raised while persisting or decoding a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The backing store failed.
    #[error("snapshot store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot could not be encoded or decoded.
    #[error("snapshot encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The snapshot decoded but does not describe a valid cache.
    #[error("snapshot rejected: {0}")]
    Invalid(String),
}

/// The persisted form of the metadata cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Snapshot {
    /// Layout version, see [`FORMAT_VERSION`].
    pub version: u32,
    /// Known-present records, keyed by normalized path.
    pub records: BTreeMap<String, Record>,
    /// Paths verified not to exist.
    #[serde(default)]
    pub misses: BTreeSet<String>,
    /// Directory completeness flags.
    #[serde(default)]
    pub complete: BTreeMap<String, Completeness>,
    /// Unix timestamp (seconds) after which the snapshot must not be served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// The backend this snapshot describes, e.g. a canonical root directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

impl Snapshot {
    /// Capture `state`, expiring `ttl` from now if given.
    #[must_use]
    pub fn capture(state: &CacheState, ttl: Option<Duration>) -> Self {
        let (entries, complete) = state.parts();
        let mut records = BTreeMap::new();
        let mut misses = BTreeSet::new();
        for (key, entry) in entries {
            match entry {
                Entry::Present(record) => {
                    records.insert(key.clone(), record.clone());
                }
                Entry::Absent => {
                    misses.insert(key.clone());
                }
            }
        }
        Self {
            version: FORMAT_VERSION,
            records,
            misses,
            complete: complete.clone(),
            expires_at: ttl.map(|ttl| unix_now().saturating_add(ttl.as_secs())),
            scope: None,
        }
    }

    /// Returns `true` if the snapshot has an expiry that lies in the past.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= unix_now())
    }

    /// Encode as JSON.
    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON without validating.
    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Check that the snapshot describes a cache this crate could have built.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let invalid = |msg: String| Err(SnapshotError::Invalid(msg));
        if self.version != FORMAT_VERSION {
            return invalid(format!(
                "version {} (expected {FORMAT_VERSION})",
                self.version
            ));
        }
        let keys = self
            .records
            .keys()
            .chain(self.misses.iter())
            .chain(self.complete.keys());
        for key in keys {
            if path::normalize(key).ok().as_deref() != Some(key.as_str()) {
                return invalid(format!("non-normalized path `{key}`"));
            }
        }
        for (key, record) in &self.records {
            if path::is_root(key) || record.path != *key {
                return invalid(format!("record `{}` stored under `{key}`", record.path));
            }
            if self.misses.contains(key) {
                return invalid(format!("`{key}` is both present and absent"));
            }
            let parent = record.dirname();
            if !path::is_root(parent) && !self.records.get(parent).is_some_and(Record::is_dir) {
                return invalid(format!("`{key}` has no directory record for its parent"));
            }
        }
        if self.misses.contains("") {
            return invalid("root marked absent".to_owned());
        }
        Ok(())
    }

    /// Rebuild the cache state described by this snapshot.
    #[must_use]
    pub fn into_state(self) -> CacheState {
        let mut entries: BTreeMap<String, Entry> = self
            .records
            .into_iter()
            .map(|(key, record)| (key, Entry::Present(record)))
            .collect();
        entries.extend(self.misses.into_iter().map(|key| (key, Entry::Absent)));
        CacheState::from_parts(entries, self.complete)
    }
}
