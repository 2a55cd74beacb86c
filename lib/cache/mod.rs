/// The public cache provider.
pub mod provider;
/// Metadata records and attribute patches.
pub mod record;
/// Persisted cache format.
pub mod snapshot;
/// In-memory record store and completeness tracker.
pub mod state;
/// Snapshot persistence backends.
pub mod store;

pub use provider::MetadataCache;
pub use record::{Attributes, EntryKind, MetadataKind, Record, Visibility};
pub use snapshot::{Snapshot, SnapshotError};
pub use state::{Completeness, Presence};
pub use store::{Ephemeral, FileStore, SnapshotStore};
