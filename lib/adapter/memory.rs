//! In-memory storage adapter.
//!
//! Used by tests and demos. All data is lost when dropped.

use std::collections::BTreeMap;
use std::io;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::warn;

use crate::cache::record::{Record, Visibility};
use crate::cache::state::{descendant_keys, descendants};
use crate::fs::adapter::{Adapter, Content, WriteOptions};
use crate::path;

#[derive(Debug, Clone)]
enum Node {
    File {
        data: Bytes,
        modified: i64,
        mime_type: Option<String>,
        visibility: Visibility,
    },
    Directory {
        modified: i64,
        visibility: Visibility,
    },
}

impl Node {
    fn is_dir(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }

    fn record(&self, path: &str) -> Record {
        match self {
            Self::File {
                data,
                modified,
                mime_type,
                visibility,
            } => {
                let mut record = Record::file(path)
                    .with_size(data.len() as u64)
                    .with_last_modified(*modified)
                    .with_visibility(*visibility);
                record.mime_type.clone_from(mime_type);
                record
            }
            Self::Directory {
                modified,
                visibility,
            } => Record::directory(path)
                .with_last_modified(*modified)
                .with_visibility(*visibility),
        }
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("not found: {path}"))
}

fn is_a_directory(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::IsADirectory, format!("is a directory: {path}"))
}

fn not_a_directory(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotADirectory, format!("not a directory: {path}"))
}

fn already_exists(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::AlreadyExists, format!("already exists: {path}"))
}

/// An adapter keeping everything in a map.
///
/// Directories are stored explicitly and created on demand for every file
/// written beneath them. The root always exists and is never stored.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    nodes: RwLock<BTreeMap<String, Node>>,
}

impl MemoryAdapter {
    /// Creates an empty adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read_nodes(&self) -> RwLockReadGuard<'_, BTreeMap<String, Node>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_nodes(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Node>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a public file directly, bypassing any cache in front of this
    /// adapter. `path` must already be normalized.
    pub fn insert_file(&self, path: &str, content: impl Into<Bytes>) {
        let mut nodes = self.write_nodes();
        if let Err(e) = Self::ensure_parents(&mut nodes, path) {
            warn!(path, error = %e, "not seeding file");
            return;
        }
        nodes.insert(
            path.to_owned(),
            Node::File {
                data: content.into(),
                modified: now(),
                mime_type: None,
                visibility: Visibility::Public,
            },
        );
    }

    /// Remove `path` and anything beneath it directly, bypassing any cache in
    /// front of this adapter.
    pub fn remove(&self, path: &str) {
        let mut nodes = self.write_nodes();
        for key in descendant_keys(&*nodes, path) {
            nodes.remove(&key);
        }
        nodes.remove(path);
    }

    /// Number of stored files and directories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_nodes().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_nodes().is_empty()
    }

    /// Create directory nodes for every missing ancestor of `path`.
    fn ensure_parents(nodes: &mut BTreeMap<String, Node>, path: &str) -> io::Result<()> {
        let missing: Vec<&str> = path::ancestors(path)
            .filter(|ancestor| !path::is_root(ancestor))
            .take_while(|ancestor| !nodes.contains_key(*ancestor))
            .collect();
        let blocker = path::ancestors(path)
            .filter(|ancestor| !path::is_root(ancestor))
            .find(|ancestor| nodes.contains_key(*ancestor));
        if let Some(blocker) = blocker
            && !nodes.get(blocker).is_some_and(Node::is_dir)
        {
            return Err(not_a_directory(blocker));
        }
        let modified = now();
        for ancestor in missing {
            nodes.insert(
                ancestor.to_owned(),
                Node::Directory {
                    modified,
                    visibility: Visibility::Public,
                },
            );
        }
        Ok(())
    }

    fn store_file(
        &self,
        path: &str,
        data: Bytes,
        options: &WriteOptions,
        must_exist: bool,
    ) -> io::Result<Record> {
        if path::is_root(path) {
            return Err(is_a_directory(path));
        }
        let mut nodes = self.write_nodes();
        let previous = match nodes.get(path) {
            Some(node) if node.is_dir() => return Err(is_a_directory(path)),
            Some(Node::File {
                mime_type,
                visibility,
                ..
            }) => Some((mime_type.clone(), *visibility)),
            _ if must_exist => return Err(not_found(path)),
            _ => None,
        };
        Self::ensure_parents(&mut nodes, path)?;
        let (old_mime, old_visibility) = previous.unwrap_or((None, Visibility::Public));
        let node = Node::File {
            data,
            modified: now(),
            mime_type: options.mime_type.clone().or(old_mime),
            visibility: options.visibility.unwrap_or(old_visibility),
        };
        let record = node.record(path);
        nodes.insert(path.to_owned(), node);
        Ok(record)
    }

    fn check_dir(nodes: &BTreeMap<String, Node>, path: &str) -> io::Result<()> {
        if path::is_root(path) {
            return Ok(());
        }
        match nodes.get(path) {
            Some(node) if node.is_dir() => Ok(()),
            Some(_) => Err(not_a_directory(path)),
            None => Err(not_found(path)),
        }
    }

    fn transfer(&self, from: &str, to: &str, keep_source: bool) -> io::Result<()> {
        let mut nodes = self.write_nodes();
        let Some(head) = nodes.get(from).cloned() else {
            return Err(not_found(from));
        };
        if path::is_root(to) || nodes.contains_key(to) {
            return Err(already_exists(to));
        }
        if path::is_descendant(from, to) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot move {from} into itself"),
            ));
        }
        Self::ensure_parents(&mut nodes, to)?;
        let moved: Vec<(String, Node)> = descendants(&*nodes, from)
            .map(|(key, node)| (key.clone(), node.clone()))
            .collect();
        if !keep_source {
            for (key, _) in &moved {
                nodes.remove(key);
            }
            nodes.remove(from);
        }
        nodes.insert(to.to_owned(), head);
        for (key, node) in moved {
            nodes.insert(path::rebase(&key, from, to), node);
        }
        Ok(())
    }
}

impl Adapter for MemoryAdapter {
    async fn stat(&self, path: &str) -> io::Result<Record> {
        if path::is_root(path) {
            return Ok(Record::directory(path));
        }
        self.read_nodes()
            .get(path)
            .map(|node| node.record(path))
            .ok_or_else(|| not_found(path))
    }

    async fn read(&self, path: &str) -> io::Result<Bytes> {
        match self.read_nodes().get(path) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(Node::Directory { .. }) => Err(is_a_directory(path)),
            None if path::is_root(path) => Err(is_a_directory(path)),
            None => Err(not_found(path)),
        }
    }

    async fn write(
        &self,
        path: &str,
        content: Content,
        options: &WriteOptions,
    ) -> io::Result<Record> {
        let data = content.into_bytes().await?;
        self.store_file(path, data, options, false)
    }

    async fn update(
        &self,
        path: &str,
        content: Content,
        options: &WriteOptions,
    ) -> io::Result<Record> {
        let data = content.into_bytes().await?;
        self.store_file(path, data, options, true)
    }

    async fn delete(&self, path: &str) -> io::Result<()> {
        let mut nodes = self.write_nodes();
        match nodes.get(path) {
            Some(Node::File { .. }) => {
                nodes.remove(path);
                Ok(())
            }
            Some(Node::Directory { .. }) => Err(is_a_directory(path)),
            None => Err(not_found(path)),
        }
    }

    async fn delete_directory(&self, path: &str) -> io::Result<()> {
        let mut nodes = self.write_nodes();
        Self::check_dir(&nodes, path)?;
        for key in descendant_keys(&*nodes, path) {
            nodes.remove(&key);
        }
        nodes.remove(path);
        Ok(())
    }

    async fn create_directory(&self, path: &str, options: &WriteOptions) -> io::Result<Record> {
        if path::is_root(path) {
            return Ok(Record::directory(path));
        }
        let mut nodes = self.write_nodes();
        match nodes.get(path) {
            Some(node) if node.is_dir() => return Ok(node.record(path)),
            Some(_) => return Err(already_exists(path)),
            None => {}
        }
        Self::ensure_parents(&mut nodes, path)?;
        let node = Node::Directory {
            modified: now(),
            visibility: options.visibility.unwrap_or(Visibility::Public),
        };
        let record = node.record(path);
        nodes.insert(path.to_owned(), node);
        Ok(record)
    }

    async fn rename(&self, path: &str, new_path: &str) -> io::Result<()> {
        self.transfer(path, new_path, false)
    }

    async fn copy(&self, path: &str, new_path: &str) -> io::Result<()> {
        self.transfer(path, new_path, true)
    }

    async fn list_contents(&self, path: &str, recursive: bool) -> io::Result<Vec<Record>> {
        let nodes = self.read_nodes();
        Self::check_dir(&nodes, path)?;
        Ok(descendants(&*nodes, path)
            .filter(|(key, _)| recursive || path::dirname(key) == path)
            .map(|(key, node)| node.record(key))
            .collect())
    }

    async fn set_visibility(&self, path: &str, visibility: Visibility) -> io::Result<()> {
        let mut nodes = self.write_nodes();
        match nodes.get_mut(path) {
            Some(Node::File { visibility: v, .. } | Node::Directory { visibility: v, .. }) => {
                *v = visibility;
                Ok(())
            }
            None => Err(not_found(path)),
        }
    }
}
