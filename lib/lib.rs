//! cachedfs shared library.

/// Reference storage adapters.
pub mod adapter;
/// Metadata caching with pluggable persistence.
pub mod cache;
/// Filesystem facade and adapter contract.
pub mod fs;
/// Path normalization and derived attributes.
pub mod path;
