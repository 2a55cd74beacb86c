//! Reference [`Adapter`](crate::fs::Adapter) implementations.
/// Local disk, rooted at a directory.
pub mod local;
/// In-memory, for tests and demos.
pub mod memory;

pub use local::LocalAdapter;
pub use memory::MemoryAdapter;
