//! The metadata record store and directory completeness tracker.
//!
//! Both maps live in one [`CacheState`] so that a single lock can guard them
//! together. Keys are normalized paths (see [`crate::path`]). Both maps are
//! [`BTreeMap`]s: all descendants of a directory `d` occupy the contiguous key
//! range starting at `"d/"`, which keeps subtree operations proportional to
//! the size of the subtree rather than the size of the cache.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::cache::record::{Attributes, Record};
use crate::path;

/// A cached answer for a single path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// The path exists and is described by the record.
    Present(Record),
    /// The path was verified not to exist.
    Absent,
}

/// How much of a directory's contents has been captured.
///
/// A directory with no flag has not been recorded at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    /// Every direct child is recorded.
    Shallow,
    /// Every descendant is recorded.
    Recursive,
}

impl Completeness {
    fn for_listing(recursive: bool) -> Self {
        if recursive {
            Self::Recursive
        } else {
            Self::Shallow
        }
    }

    /// Returns `true` if this flag answers a listing of the given depth.
    #[must_use]
    pub fn satisfies(self, recursive: bool) -> bool {
        !recursive || self == Self::Recursive
    }
}

/// The cache's answer to an existence query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Presence {
    /// The path is known to exist.
    Present,
    /// The path is known not to exist.
    Absent,
    /// The cache cannot tell; the backend must be asked.
    Unknown,
}

/// Iterate every `(key, value)` of `map` strictly beneath `dir`, in key order.
pub(crate) fn descendants<'a, V>(
    map: &'a BTreeMap<String, V>,
    dir: &str,
) -> Box<dyn Iterator<Item = (&'a String, &'a V)> + 'a> {
    if path::is_root(dir) {
        return Box::new(map.iter().filter(|(key, _)| !key.is_empty()));
    }
    let prefix = format!("{dir}/");
    Box::new(
        map.range(prefix.clone()..)
            .take_while(move |(key, _)| key.starts_with(&prefix)),
    )
}

pub(crate) fn descendant_keys<V>(map: &BTreeMap<String, V>, dir: &str) -> Vec<String> {
    descendants(map, dir).map(|(key, _)| key.clone()).collect()
}

/// Records, absence markers and completeness flags.
///
/// Structural changes (a key appearing, disappearing or flipping between
/// present and absent) advance a counter that is never reset. Each change is
/// stamped on the paths it affects, so [`CacheState::generation_of`] only
/// moves for a directory when something at or beneath it changed, when an
/// ancestor's subtree was dropped, or when the whole state was replaced.
/// Merges into an existing record do not count.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheState {
    records: BTreeMap<String, Entry>,
    complete: BTreeMap<String, Completeness>,
    generation: u64,
    /// Last change at or beneath each directory.
    touched: BTreeMap<String, u64>,
    /// Last time each path's whole subtree was dropped or replaced.
    cleared: BTreeMap<String, u64>,
    /// Last flush or wholesale replacement.
    floor: u64,
}

impl CacheState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a state from its parts. Used when restoring snapshots.
    pub(crate) fn from_parts(
        records: BTreeMap<String, Entry>,
        complete: BTreeMap<String, Completeness>,
    ) -> Self {
        Self {
            records,
            complete,
            ..Self::default()
        }
    }

    /// Take over the contents of `other`, keeping this state's counter
    /// running so no earlier generation can be observed again.
    pub(crate) fn replace_with(&mut self, other: Self) {
        self.records = other.records;
        self.complete = other.complete;
        self.reset_stamps();
    }

    /// Borrow the raw maps. Used when taking snapshots.
    pub(crate) fn parts(&self) -> (&BTreeMap<String, Entry>, &BTreeMap<String, Completeness>) {
        (&self.records, &self.complete)
    }

    /// The global structural generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The generation of the listing of `dir`: changes whenever a cached
    /// listing of `dir` fetched earlier could no longer be stored safely.
    #[must_use]
    pub fn generation_of(&self, dir: &str) -> u64 {
        let own = self.touched.get(dir).copied().unwrap_or(0);
        let inherited = std::iter::once(dir)
            .chain(path::ancestors(dir))
            .filter_map(|ancestor| self.cleared.get(ancestor).copied())
            .max()
            .unwrap_or(0);
        own.max(inherited).max(self.floor)
    }

    /// Record a structural change at `path`.
    fn bump(&mut self, path: &str) {
        self.generation += 1;
        let generation = self.generation;
        self.touched.insert(path.to_owned(), generation);
        for ancestor in path::ancestors(path) {
            self.touched.insert(ancestor.to_owned(), generation);
        }
    }

    /// Record a structural change that dropped or replaced everything
    /// beneath `path`.
    fn bump_subtree(&mut self, path: &str) {
        self.bump(path);
        self.cleared.insert(path.to_owned(), self.generation);
    }

    fn reset_stamps(&mut self) {
        self.generation += 1;
        self.touched.clear();
        self.cleared.clear();
        self.floor = self.generation;
    }

    /// Number of entries, present or absent.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if nothing at all is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.complete.is_empty()
    }

    /// Answer an existence query from cached knowledge alone.
    ///
    /// Absence is inferred without an explicit marker when:
    /// - the parent directory has any completeness flag, or
    /// - some ancestor has a recursive completeness flag, or
    /// - some ancestor is itself known to be absent.
    ///
    /// A shallow flag on a grandparent says nothing about grandchildren.
    #[must_use]
    pub fn presence(&self, path: &str) -> Presence {
        if path::is_root(path) {
            return Presence::Present;
        }
        match self.records.get(path) {
            Some(Entry::Present(_)) => return Presence::Present,
            Some(Entry::Absent) => return Presence::Absent,
            None => {}
        }
        let parent = path::dirname(path);
        for ancestor in path::ancestors(path) {
            if matches!(self.records.get(ancestor), Some(Entry::Absent)) {
                return Presence::Absent;
            }
            match self.complete.get(ancestor) {
                Some(Completeness::Recursive) => return Presence::Absent,
                Some(Completeness::Shallow) if ancestor == parent => return Presence::Absent,
                _ => {}
            }
        }
        Presence::Unknown
    }

    /// The cached record for `path`, if it is known to exist.
    #[must_use]
    pub fn record(&self, path: &str) -> Option<&Record> {
        match self.records.get(path) {
            Some(Entry::Present(record)) => Some(record),
            _ => None,
        }
    }

    /// The completeness flag recorded for `dir` itself.
    #[must_use]
    pub fn completeness(&self, dir: &str) -> Option<Completeness> {
        self.complete.get(dir).copied()
    }

    /// Returns `true` if a listing of `dir` at the requested depth can be
    /// answered from the cache.
    ///
    /// A recursive flag on any ancestor covers `dir` as well, since the
    /// listing that produced it contained the whole subtree.
    #[must_use]
    pub fn is_complete(&self, dir: &str, recursive: bool) -> bool {
        if self
            .complete
            .get(dir)
            .is_some_and(|flag| flag.satisfies(recursive))
        {
            return true;
        }
        path::ancestors(dir).any(|ancestor| self.complete.get(ancestor) == Some(&Completeness::Recursive))
    }

    /// Record that `dir` has been listed. Never downgrades a recursive flag.
    pub fn set_complete(&mut self, dir: &str, recursive: bool) {
        let flag = Completeness::for_listing(recursive);
        self.complete
            .entry(dir.to_owned())
            .and_modify(|current| {
                if flag == Completeness::Recursive {
                    *current = flag;
                }
            })
            .or_insert(flag);
    }

    /// Merge `attrs` into the record for `path`, creating it if needed.
    ///
    /// Clears an absence marker for `path` and synthesizes directory records
    /// for any unknown ancestors.
    pub fn update(&mut self, path: &str, attrs: Attributes) {
        if path::is_root(path) {
            return;
        }
        match self.records.get_mut(path) {
            Some(Entry::Present(record)) => record.merge(&attrs),
            Some(Entry::Absent) | None => {
                self.records
                    .insert(path.to_owned(), Entry::Present(attrs.into_record(path.to_owned())));
                self.bump(path);
            }
        }
        self.ensure_parents(path);
    }

    /// Merge `attrs` into the record for `path` only if one is cached.
    /// Returns whether a record was updated.
    pub fn merge_existing(&mut self, path: &str, attrs: &Attributes) -> bool {
        match self.records.get_mut(path) {
            Some(Entry::Present(record)) => {
                record.merge(attrs);
                true
            }
            _ => false,
        }
    }

    /// Walk up from the parent of `path`, creating directory records until
    /// a known directory or the root is reached.
    ///
    /// An ancestor cached as a file or as absent is stale by construction
    /// once a descendant exists, and is replaced.
    fn ensure_parents(&mut self, path: &str) {
        let mut created = false;
        for ancestor in path::ancestors(path) {
            if path::is_root(ancestor) {
                break;
            }
            if let Some(Entry::Present(record)) = self.records.get(ancestor)
                && record.is_dir()
            {
                break;
            }
            self.records.insert(
                ancestor.to_owned(),
                Entry::Present(Record::directory(ancestor)),
            );
            created = true;
        }
        if created {
            self.bump(path);
        }
    }

    /// Remove `dir` (if `include_self`) and every key beneath it from both maps.
    fn remove_subtree(&mut self, dir: &str, include_self: bool) -> bool {
        let mut removed = false;
        for key in descendant_keys(&self.records, dir) {
            self.records.remove(&key);
            removed = true;
        }
        for key in descendant_keys(&self.complete, dir) {
            self.complete.remove(&key);
        }
        if include_self {
            removed |= self.records.remove(dir).is_some();
            self.complete.remove(dir);
        }
        removed
    }

    /// Install an absence marker for `path`.
    ///
    /// Anything cached beneath `path` is dropped: a missing directory has no
    /// contents.
    pub fn store_miss(&mut self, path: &str) {
        if path::is_root(path) {
            return;
        }
        let removed = self.remove_subtree(path, false);
        self.complete.remove(path);
        if self.records.insert(path.to_owned(), Entry::Absent) != Some(Entry::Absent) || removed {
            self.bump_subtree(path);
        }
    }

    /// Store the complete listing of `dir` returned by a backend.
    ///
    /// The listing is authoritative: previously cached entries beneath `dir`
    /// that it no longer mentions (direct children for a shallow listing,
    /// every descendant for a recursive one) are removed. Ancestors of listed
    /// paths are kept even if the backend does not list them explicitly,
    /// since object stores commonly report directories only implicitly.
    ///
    /// A recursive listing also marks every directory it covers as
    /// recursively complete.
    pub fn store_listing(&mut self, dir: &str, records: Vec<Record>, recursive: bool) {
        let mut keep: HashSet<String> = HashSet::with_capacity(records.len());
        for record in &records {
            keep.insert(record.path.clone());
            for ancestor in path::ancestors(&record.path) {
                if !path::is_descendant(dir, ancestor) || !keep.insert(ancestor.to_owned()) {
                    break;
                }
            }
        }

        let stale: Vec<String> = descendants(&self.records, dir)
            .filter(|(key, entry)| {
                matches!(entry, Entry::Present(_))
                    && !keep.contains(key.as_str())
                    && (recursive || path::dirname(key) == dir)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            self.remove_subtree(key, true);
            self.bump_subtree(key);
        }

        let mut covered: Vec<String> = Vec::new();
        for record in records {
            if recursive && path::is_descendant(dir, &record.path) {
                if record.is_dir() {
                    covered.push(record.path.clone());
                }
                let parent = path::dirname(&record.path);
                if path::is_descendant(dir, parent) {
                    covered.push(parent.to_owned());
                }
            }
            let key = record.path.clone();
            self.update(&key, record.into());
        }

        self.set_complete(dir, recursive);
        for sub in covered {
            self.set_complete(&sub, true);
        }
    }

    /// Assemble the cached listing of `dir`, or `None` if the cache does not
    /// hold a complete listing at the requested depth.
    #[must_use]
    pub fn list(&self, dir: &str, recursive: bool) -> Option<Vec<Record>> {
        if !self.is_complete(dir, recursive) {
            return None;
        }
        let listing = descendants(&self.records, dir)
            .filter_map(|(key, entry)| match entry {
                Entry::Present(record) if recursive || path::dirname(key) == dir => {
                    Some(record.clone())
                }
                _ => None,
            })
            .collect();
        Some(listing)
    }

    /// Move the record at `from` to `to`, along with everything beneath it.
    ///
    /// Backend-sourced attributes are preserved; path-derived attributes
    /// follow the new key. Returns `false` (and changes nothing) if `from`
    /// is not a known record.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        if from == to || path::is_descendant(from, to) {
            return false;
        }
        let Some((records, flags)) = self.extract_subtree(from) else {
            return false;
        };
        self.remove_subtree(from, true);
        self.bump_subtree(from);
        self.graft_subtree(from, to, records, flags);
        true
    }

    /// Copy the record at `from` to `to`, along with everything beneath it.
    ///
    /// Returns `false` (and changes nothing) if `from` is not a known record.
    pub fn copy(&mut self, from: &str, to: &str) -> bool {
        if from == to || path::is_descendant(from, to) {
            return false;
        }
        let Some((records, flags)) = self.extract_subtree(from) else {
            return false;
        };
        self.graft_subtree(from, to, records, flags);
        true
    }

    /// Clone the present records and completeness flags rooted at `root`.
    fn extract_subtree(
        &self,
        root: &str,
    ) -> Option<(Vec<Record>, Vec<(String, Completeness)>)> {
        let head = self.record(root)?.clone();
        let mut records = vec![head];
        let mut flags: Vec<(String, Completeness)> = Vec::new();
        if records[0].is_dir() {
            records.extend(descendants(&self.records, root).filter_map(|(_, entry)| {
                match entry {
                    Entry::Present(record) => Some(record.clone()),
                    Entry::Absent => None,
                }
            }));
            if let Some(flag) = self.complete.get(root) {
                flags.push((root.to_owned(), *flag));
            }
            flags.extend(
                descendants(&self.complete, root).map(|(key, flag)| (key.clone(), *flag)),
            );
        }
        Some((records, flags))
    }

    /// Insert records and flags captured beneath `from` at their rebased
    /// location beneath `to`, replacing whatever was cached there.
    fn graft_subtree(
        &mut self,
        from: &str,
        to: &str,
        records: Vec<Record>,
        flags: Vec<(String, Completeness)>,
    ) {
        self.remove_subtree(to, true);
        for mut record in records {
            record.path = path::rebase(&record.path, from, to);
            self.records
                .insert(record.path.clone(), Entry::Present(record));
        }
        for (key, flag) in flags {
            self.complete.insert(path::rebase(&key, from, to), flag);
        }
        self.ensure_parents(to);
        self.bump_subtree(to);
    }

    /// Remove `dir`, every key beneath it and the completeness flags of all
    /// of them. Ancestor flags are left alone; listings are assembled from
    /// the records, so ancestors stop reporting `dir` immediately.
    ///
    /// Deleting the root empties the cache.
    pub fn delete_prefix(&mut self, dir: &str) {
        if path::is_root(dir) {
            self.flush();
            return;
        }
        if self.remove_subtree(dir, true) {
            self.bump_subtree(dir);
        }
    }

    /// Forget everything.
    pub fn flush(&mut self) {
        self.records.clear();
        self.complete.clear();
        self.reset_stamps();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, size: u64) -> Record {
        Record::file(path).with_size(size)
    }

    #[test]
    fn unknown_until_recorded() {
        let state = CacheState::new();
        assert_eq!(state.presence("a.txt"), Presence::Unknown);
        assert_eq!(state.presence(""), Presence::Present);
    }

    #[test]
    fn update_synthesizes_parent_chain() {
        let mut state = CacheState::new();
        state.update("a/b/c.txt", file("a/b/c.txt", 3).into());
        assert!(state.record("a").is_some_and(Record::is_dir));
        assert!(state.record("a/b").is_some_and(Record::is_dir));
        assert_eq!(state.record("a/b/c.txt").and_then(|r| r.size), Some(3));
    }

    #[test]
    fn merge_existing_never_creates_records() {
        let mut state = CacheState::new();
        assert!(!state.merge_existing("d", &Attributes::default()));
        assert_eq!(state.presence("d"), Presence::Unknown);

        state.update("d/f.txt", Attributes::default());
        let private = Attributes {
            visibility: Some(crate::cache::record::Visibility::Private),
            ..Attributes::default()
        };
        assert!(state.merge_existing("d", &private));
        assert!(state.record("d").is_some_and(Record::is_dir));
    }

    #[test]
    fn update_clears_absence() {
        let mut state = CacheState::new();
        state.store_miss("x.txt");
        assert_eq!(state.presence("x.txt"), Presence::Absent);
        state.update("x.txt", Attributes::default());
        assert_eq!(state.presence("x.txt"), Presence::Present);
    }

    #[test]
    fn shallow_flag_only_covers_direct_children() {
        let mut state = CacheState::new();
        state.store_listing("a", vec![Record::directory("a/sub")], false);
        assert_eq!(state.presence("a/nope"), Presence::Absent);
        assert_eq!(state.presence("a/sub/deeper"), Presence::Unknown);
    }

    #[test]
    fn recursive_flag_covers_descendants() {
        let mut state = CacheState::new();
        state.store_listing(
            "a",
            vec![Record::directory("a/sub"), file("a/sub/f", 1)],
            true,
        );
        assert_eq!(state.presence("a/sub/g"), Presence::Absent);
        assert_eq!(state.presence("a/other/g"), Presence::Absent);
        assert_eq!(state.completeness("a/sub"), Some(Completeness::Recursive));
        assert!(state.list("a/sub", true).is_some());
    }

    #[test]
    fn absent_ancestor_implies_absent_descendant() {
        let mut state = CacheState::new();
        state.store_miss("gone");
        assert_eq!(state.presence("gone/child.txt"), Presence::Absent);
    }

    #[test]
    fn listing_prunes_entries_backend_no_longer_reports() {
        let mut state = CacheState::new();
        state.update("d/old.txt", file("d/old.txt", 1).into());
        state.store_listing("d", vec![file("d/new.txt", 2)], false);
        assert!(state.record("d/old.txt").is_none());
        let listed = state.list("d", false).unwrap_or_default();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, "d/new.txt");
    }

    #[test]
    fn listing_keeps_implicit_directories() {
        let mut state = CacheState::new();
        state.store_listing("", vec![file("a/b/c.txt", 1)], true);
        assert!(state.record("a/b").is_some_and(Record::is_dir));
        let listed = state.list("", true).unwrap_or_default();
        let paths: Vec<_> = listed.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, ["a", "a/b", "a/b/c.txt"]);
    }

    #[test]
    fn set_complete_never_downgrades() {
        let mut state = CacheState::new();
        state.set_complete("d", true);
        state.set_complete("d", false);
        assert_eq!(state.completeness("d"), Some(Completeness::Recursive));
    }

    #[test]
    fn rename_moves_subtree_and_flags() {
        let mut state = CacheState::new();
        state.store_listing("a", vec![file("a/x", 1), Record::directory("a/s")], true);
        assert!(state.rename("a", "b"));
        assert!(state.record("a").is_none());
        assert_eq!(state.record("b/x").and_then(|r| r.size), Some(1));
        assert_eq!(state.completeness("b"), Some(Completeness::Recursive));
        assert_eq!(state.completeness("a"), None);
    }

    #[test]
    fn rename_of_unknown_path_is_noop() {
        let mut state = CacheState::new();
        let before = state.clone();
        assert!(!state.rename("nope", "other"));
        assert_eq!(state, before);
    }

    #[test]
    fn delete_prefix_respects_separator_boundary() {
        let mut state = CacheState::new();
        state.update("dir/a", Attributes::default());
        state.update("dir2/b", Attributes::default());
        state.set_complete("dir", false);
        state.delete_prefix("dir");
        assert!(state.record("dir").is_none());
        assert!(state.record("dir/a").is_none());
        assert!(state.record("dir2/b").is_some());
        assert_eq!(state.completeness("dir"), None);
    }

    #[test]
    fn generation_tracks_structural_changes_only() {
        let mut state = CacheState::new();
        state.update("f", Attributes::default());
        let generation = state.generation();
        state.update("f", file("f", 9).into());
        assert_eq!(state.generation(), generation);
        state.store_miss("f");
        assert_ne!(state.generation(), generation);
    }

    #[test]
    fn directory_generation_ignores_unrelated_changes() {
        let mut state = CacheState::new();
        let a = state.generation_of("a");
        state.store_miss("elsewhere/unrelated.txt");
        state.update("b/c.txt", Attributes::default());
        assert_eq!(state.generation_of("a"), a);

        state.update("a/d/e.txt", Attributes::default());
        assert_ne!(state.generation_of("a"), a);
    }

    #[test]
    fn directory_generation_moves_when_an_ancestor_is_dropped() {
        let mut state = CacheState::new();
        state.update("a/b/c.txt", Attributes::default());
        let nested = state.generation_of("a/b");
        state.store_miss("a");
        assert_ne!(state.generation_of("a/b"), nested);
    }

    #[test]
    fn generation_keeps_running_across_replacement() {
        let mut state = CacheState::new();
        state.update("a/x", Attributes::default());
        let before = state.generation_of("a");

        state.replace_with(CacheState::from_parts(BTreeMap::new(), BTreeMap::new()));
        let after = state.generation_of("a");
        assert!(after > before);
        assert!(state.generation() > before);

        state.flush();
        assert!(state.generation_of("a") > after);
    }
}
