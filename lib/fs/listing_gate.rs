//! Coalescing of concurrent directory listings.
//!
//! When several callers miss the cache for the same `(directory, recursive)`
//! pair at once, only the first one asks the adapter. The others wait for it
//! to finish and then re-read the cache. If the first caller fails or is
//! cancelled the waiters find nothing cached and one of them claims the
//! listing in turn.

use std::sync::Arc;

use tokio::sync::Notify;

type GateKey = (String, bool);

/// Result of attempting to claim a listing.
pub enum Claim<'a> {
    /// This caller won the race and should list the directory. The claim is
    /// released when the guard drops.
    Claimed(ClaimGuard<'a>),
    /// Another caller is listing the directory.
    InProgress(Waiter<'a>),
}

/// Tracks which listings are in flight.
#[derive(Default)]
pub struct ListingGate {
    inflight: scc::HashMap<GateKey, Arc<Notify>>,
}

impl ListingGate {
    /// Creates a gate with nothing in flight.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the listing of `dir` at the given depth.
    pub fn try_claim(&self, dir: &str, recursive: bool) -> Claim<'_> {
        let key = (dir.to_owned(), recursive);
        match self.inflight.entry_sync(key.clone()) {
            scc::hash_map::Entry::Occupied(occ) => Claim::InProgress(Waiter {
                gate: self,
                notify: Arc::clone(occ.get()),
                key,
            }),
            scc::hash_map::Entry::Vacant(vac) => {
                let notify = Arc::new(Notify::new());
                vac.insert_entry(Arc::clone(&notify));
                Claim::Claimed(ClaimGuard {
                    gate: self,
                    notify,
                    key,
                })
            }
        }
    }

    /// Number of listings currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    fn is_current(&self, key: &GateKey, notify: &Arc<Notify>) -> bool {
        self.inflight
            .read_sync(key, |_, current| Arc::ptr_eq(current, notify))
            .unwrap_or(false)
    }
}

/// Held by the caller performing a listing.
///
/// Dropping it, on success, failure or cancellation alike, releases the
/// claim and wakes every waiter.
pub struct ClaimGuard<'a> {
    gate: &'a ListingGate,
    notify: Arc<Notify>,
    key: GateKey,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        let notify = &self.notify;
        drop(
            self.gate
                .inflight
                .remove_if_sync(&self.key, |current| Arc::ptr_eq(current, notify)),
        );
        self.notify.notify_waiters();
    }
}

/// Handed to callers that lost the race for a listing.
pub struct Waiter<'a> {
    gate: &'a ListingGate,
    notify: Arc<Notify>,
    key: GateKey,
}

impl Waiter<'_> {
    /// Wait until the claim this waiter observed is released.
    ///
    /// The `Notified` future is enabled before the claim is re-checked, so a
    /// release racing with this call cannot be missed.
    pub async fn wait(self) {
        let mut notified = std::pin::pin!(self.notify.notified());
        notified.as_mut().enable();
        if !self.gate.is_current(&self.key, &self.notify) {
            return;
        }
        notified.await;
    }
}
