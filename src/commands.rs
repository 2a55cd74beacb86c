//! Command execution against a cached view of the configured root.

use cachedfs::adapter::LocalAdapter;
use cachedfs::cache::store::InvalidStorePathError;
use cachedfs::cache::{FileStore, MetadataCache, Record, SnapshotError, Visibility};
use cachedfs::fs::{CachedFs, Content, FsError, WriteOptions};
use clap::Subcommand;
use futures::StreamExt as _;
use thiserror::Error;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tracing::{debug, info};

use crate::app_config::Config;

type Fs = CachedFs<LocalAdapter, FileStore>;

/// The operations the command line exposes.
#[derive(Subcommand)]
pub enum Command {
    /// List a directory.
    Ls {
        /// Directory to list. Defaults to the root.
        #[arg(default_value = "")]
        path: String,

        /// List the whole subtree.
        #[arg(short, long)]
        recursive: bool,
    },

    /// Print the metadata of an entry.
    Stat { path: String },

    /// Print the content of a file.
    Cat { path: String },

    /// Create a new file. Reads standard input when no content is given.
    Write {
        path: String,
        content: Option<String>,

        /// Make the file private.
        #[arg(long)]
        private: bool,
    },

    /// Create or replace a file. Reads standard input when no content is given.
    Put {
        path: String,
        content: Option<String>,

        /// Make the file private.
        #[arg(long)]
        private: bool,
    },

    /// Delete a file.
    Rm { path: String },

    /// Delete a directory and everything beneath it.
    Rmdir { path: String },

    /// Create a directory, including missing parents.
    Mkdir {
        path: String,

        /// Make the directory private.
        #[arg(long)]
        private: bool,
    },

    /// Move an entry.
    Mv { from: String, to: String },

    /// Copy an entry.
    Cp { from: String, to: String },

    /// Print the visibility of an entry, or change it.
    Visibility {
        path: String,
        value: Option<Visibility>,
    },

    /// Inspect or reset the metadata cache.
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

/// Operations on the metadata cache itself.
#[derive(Subcommand)]
pub enum CacheCommand {
    /// Forget everything the cache knows.
    Flush,
    /// Print the persisted cache.
    Show,
}

/// Errors that end a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The filesystem operation failed.
    #[error(transparent)]
    Fs(#[from] FsError),

    /// The configured cache file can not be used.
    #[error("Invalid cache path: {0}")]
    StorePath(#[from] InvalidStorePathError),

    /// The cache could not be saved at exit.
    #[error("Failed to persist the cache: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Output could not be serialized.
    #[error("Failed to render output: {0}")]
    Render(#[from] serde_json::Error),

    /// Terminal or runtime I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn write_options(private: bool) -> WriteOptions {
    if private {
        WriteOptions::with_visibility(Visibility::Private)
    } else {
        WriteOptions::default()
    }
}

async fn content_or_stdin(content: Option<String>) -> Result<Content, CommandError> {
    if let Some(content) = content {
        return Ok(Content::from(content.into_bytes()));
    }
    let mut buf = Vec::new();
    tokio::io::stdin().read_to_end(&mut buf).await?;
    Ok(Content::from(buf))
}

fn print_record(record: &Record) {
    let size = record
        .size
        .map_or_else(|| "-".to_owned(), |size| size.to_string());
    let kind = if record.is_dir() { 'd' } else { 'f' };
    println!("{kind} {size:>10} {}", record.path);
}

/// Open the configured root behind a cache that only accepts snapshots
/// taken of that same root.
async fn open(config: &Config) -> Result<Fs, CommandError> {
    let root = tokio::fs::canonicalize(&config.root).await?;
    let store = FileStore::new(&config.cache.path).await?;
    let mut cache = MetadataCache::new(store).with_scope(root.to_string_lossy());
    if let Some(ttl) = config.cache.expire_after() {
        cache = cache.with_expiry(ttl);
    }
    cache.set_autosave(config.cache.autosave);
    if cache.load().await {
        debug!(entries = cache.len(), "resuming from saved cache");
    }
    Ok(CachedFs::new(LocalAdapter::new(root), cache))
}

async fn execute(fs: &Fs, command: Command) -> Result<(), CommandError> {
    match command {
        Command::Ls { path, recursive } => {
            for record in fs.list_contents(&path, recursive).await? {
                print_record(&record);
            }
        }
        Command::Stat { path } => {
            let record = fs.get_metadata(&path).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Cat { path } => {
            let mut chunks = fs.read_stream(&path).await?;
            let mut stdout = tokio::io::stdout();
            while let Some(chunk) = chunks.next().await {
                stdout.write_all(&chunk?).await?;
            }
            stdout.flush().await?;
        }
        Command::Write {
            path,
            content,
            private,
        } => {
            let content = content_or_stdin(content).await?;
            let record = fs.write(&path, content, &write_options(private)).await?;
            print_record(&record);
        }
        Command::Put {
            path,
            content,
            private,
        } => {
            let content = content_or_stdin(content).await?;
            let record = fs.put(&path, content, &write_options(private)).await?;
            print_record(&record);
        }
        Command::Rm { path } => fs.delete(&path).await?,
        Command::Rmdir { path } => fs.delete_directory(&path).await?,
        Command::Mkdir { path, private } => {
            let record = fs.create_directory(&path, &write_options(private)).await?;
            print_record(&record);
        }
        Command::Mv { from, to } => fs.rename(&from, &to).await?,
        Command::Cp { from, to } => fs.copy(&from, &to).await?,
        Command::Visibility { path, value } => match value {
            Some(visibility) => fs.set_visibility(&path, visibility).await?,
            None => println!("{}", fs.get_visibility(&path).await?),
        },
        Command::Cache { action } => match action {
            CacheCommand::Flush => {
                fs.flush_cache().await;
                info!("cache flushed");
            }
            CacheCommand::Show => {
                let snapshot = fs.cache().snapshot();
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
        },
    }
    Ok(())
}

/// Run `command` to completion on a fresh runtime.
pub fn run(config: &Config, command: Command) -> Result<(), CommandError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let fs = open(config).await?;
        let result = execute(&fs, command).await;
        if !fs.cache().autosave_enabled() {
            fs.cache().save().await?;
        }
        result
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cachedfs::cache::Presence;

    use super::*;
    use crate::app_config::CacheConfig;

    fn config(root: &std::path::Path, cache_path: &std::path::Path) -> Config {
        Config {
            root: root.to_path_buf(),
            cache: CacheConfig {
                path: cache_path.to_path_buf(),
                ..CacheConfig::default()
            },
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cache_of_one_root_never_answers_for_another() {
        let root_a = tempfile::tempdir().unwrap();
        let root_b = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let cache_path = state.path().join("metadata.json");
        std::fs::write(root_a.path().join("only_in_a.txt"), "aaa").unwrap();
        std::fs::write(root_b.path().join("only_in_b.txt"), "bbb").unwrap();

        let fs_a = open(&config(root_a.path(), &cache_path)).await.unwrap();
        assert_eq!(fs_a.list_contents("", false).await.unwrap().len(), 1);
        drop(fs_a);

        let fs_b = open(&config(root_b.path(), &cache_path)).await.unwrap();
        assert!(fs_b.cache().is_empty());
        assert_eq!(fs_b.cache().has("only_in_b.txt"), Presence::Unknown);
        let listing = fs_b.list_contents("", false).await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].path, "only_in_b.txt");
        assert_eq!(fs_b.get_size("only_in_b.txt").await.unwrap(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reopening_the_same_root_resumes_the_cache() {
        let root = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let cache_path = state.path().join("metadata.json");
        std::fs::write(root.path().join("f.txt"), "f").unwrap();

        let fs = open(&config(root.path(), &cache_path)).await.unwrap();
        fs.list_contents("", false).await.unwrap();
        drop(fs);

        let reopened = open(&config(root.path(), &cache_path)).await.unwrap();
        assert!(reopened.cache().is_complete("", false));
        assert_eq!(reopened.cache().has("f.txt"), Presence::Present);
    }
}
