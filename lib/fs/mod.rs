//! The filesystem facade and the adapter contract it drives.
/// The storage adapter capability contract.
pub mod adapter;
/// Cache-fronted filesystem operations.
pub mod cached_fs;
/// Errors surfaced to facade callers.
pub mod error;
/// Coalescing of concurrent directory listings.
pub mod listing_gate;

pub use adapter::{Adapter, ByteStream, Content, WriteOptions};
pub use cached_fs::CachedFs;
pub use error::FsError;
