#![allow(missing_docs, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;

use cachedfs::adapter::MemoryAdapter;
use cachedfs::cache::{Record, Visibility};
use cachedfs::fs::{Adapter, ByteStream, Content, WriteOptions};

/// Adapter operations, for counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Exists,
    Stat,
    Read,
    ReadStream,
    Write,
    Update,
    Delete,
    DeleteDirectory,
    CreateDirectory,
    Rename,
    Copy,
    ListContents,
    SetVisibility,
}

/// Wraps a [`MemoryAdapter`], counting every call per operation.
///
/// [`fail_next`](Self::fail_next) makes the next call of an operation fail
/// with an I/O error before it reaches the inner adapter.
#[derive(Debug, Default)]
pub struct CountingAdapter {
    pub inner: MemoryAdapter,
    calls: Mutex<HashMap<Op, usize>>,
    failures: Mutex<HashSet<Op>>,
    list_delay: Option<Duration>,
}

impl CountingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every listing, to widen race windows.
    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    pub fn calls(&self, op: Op) -> usize {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn fail_next(&self, op: Op) {
        self.failures.lock().unwrap().insert(op);
    }

    fn enter(&self, op: Op) -> io::Result<()> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        if self.failures.lock().unwrap().remove(&op) {
            return Err(io::Error::other(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

impl Adapter for CountingAdapter {
    async fn exists(&self, path: &str) -> io::Result<Option<Record>> {
        self.enter(Op::Exists)?;
        self.inner.exists(path).await
    }

    async fn stat(&self, path: &str) -> io::Result<Record> {
        self.enter(Op::Stat)?;
        self.inner.stat(path).await
    }

    async fn read(&self, path: &str) -> io::Result<Bytes> {
        self.enter(Op::Read)?;
        self.inner.read(path).await
    }

    async fn read_stream(&self, path: &str) -> io::Result<ByteStream> {
        self.enter(Op::ReadStream)?;
        self.inner.read_stream(path).await
    }

    async fn write(&self, path: &str, content: Content, options: &WriteOptions) -> io::Result<Record> {
        self.enter(Op::Write)?;
        self.inner.write(path, content, options).await
    }

    async fn update(&self, path: &str, content: Content, options: &WriteOptions) -> io::Result<Record> {
        self.enter(Op::Update)?;
        self.inner.update(path, content, options).await
    }

    async fn delete(&self, path: &str) -> io::Result<()> {
        self.enter(Op::Delete)?;
        self.inner.delete(path).await
    }

    async fn delete_directory(&self, path: &str) -> io::Result<()> {
        self.enter(Op::DeleteDirectory)?;
        self.inner.delete_directory(path).await
    }

    async fn create_directory(&self, path: &str, options: &WriteOptions) -> io::Result<Record> {
        self.enter(Op::CreateDirectory)?;
        self.inner.create_directory(path, options).await
    }

    async fn rename(&self, path: &str, new_path: &str) -> io::Result<()> {
        self.enter(Op::Rename)?;
        self.inner.rename(path, new_path).await
    }

    async fn copy(&self, path: &str, new_path: &str) -> io::Result<()> {
        self.enter(Op::Copy)?;
        self.inner.copy(path, new_path).await
    }

    async fn list_contents(&self, path: &str, recursive: bool) -> io::Result<Vec<Record>> {
        self.enter(Op::ListContents)?;
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.list_contents(path, recursive).await
    }

    async fn set_visibility(&self, path: &str, visibility: Visibility) -> io::Result<()> {
        self.enter(Op::SetVisibility)?;
        self.inner.set_visibility(path, visibility).await
    }
}
