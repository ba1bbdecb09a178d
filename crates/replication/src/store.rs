//! Per-node in-memory store.
//!
//! Every mutation goes through a single `DashMap` entry, so the compare of
//! the stored version and the replacement happen atomically per key.

use dashmap::mapref::entry::Entry as Slot;
use dashmap::DashMap;

use crate::order::version_wins;
use crate::types::{ApplyOutcome, CacheKey, Entry};
use crate::version::EntryVersion;

#[derive(Debug, Default)]
pub struct VersionedStore {
    entries: DashMap<CacheKey, Entry>,
}

impl VersionedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `entry` if `decide` answers `Applied` for the current version.
    pub fn apply_with<F>(&self, entry: Entry, decide: F) -> ApplyOutcome
    where
        F: FnOnce(Option<&EntryVersion>, &EntryVersion) -> ApplyOutcome,
    {
        match self.entries.entry(entry.key.clone()) {
            Slot::Occupied(mut slot) => {
                let outcome = decide(Some(&slot.get().version), &entry.version);
                if outcome == ApplyOutcome::Applied {
                    slot.insert(entry);
                }
                outcome
            }
            Slot::Vacant(slot) => {
                let outcome = decide(None, &entry.version);
                if outcome == ApplyOutcome::Applied {
                    slot.insert(entry);
                }
                outcome
            }
        }
    }

    /// Version-wins install, regardless of write order mode.
    pub fn install(&self, entry: Entry) -> ApplyOutcome {
        self.apply_with(entry, version_wins)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Entry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn version(&self, key: &CacheKey) -> Option<EntryVersion> {
        self.entries.get(key).map(|e| e.version)
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::{NodeId, TopologyVersion};
    use proptest::prelude::*;

    fn entry(key: u8, value: u8, order: u64, node: u128) -> Entry {
        Entry {
            key: CacheKey::from_bytes(vec![key]),
            value: vec![value],
            version: EntryVersion::new(TopologyVersion(1), order, NodeId(node)),
        }
    }

    #[test]
    fn test_install_keeps_highest() {
        let store = VersionedStore::new();
        assert_eq!(store.install(entry(1, 10, 5, 1)), ApplyOutcome::Applied);
        assert_eq!(store.install(entry(1, 20, 3, 1)), ApplyOutcome::Duplicate);
        assert_eq!(store.install(entry(1, 30, 5, 1)), ApplyOutcome::Duplicate);
        assert_eq!(store.install(entry(1, 40, 5, 2)), ApplyOutcome::Applied);

        let key = CacheKey::from_bytes(vec![1]);
        assert_eq!(store.get(&key).unwrap().value, vec![40]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_rejected_outcome_leaves_store_untouched() {
        let store = VersionedStore::new();
        let outcome = store.apply_with(entry(2, 1, 7, 1), |_, _| ApplyOutcome::OutOfOrder {
            expected: 1,
            got: 7,
        });
        assert!(!outcome.is_acknowledged());
        assert!(store.is_empty());
    }

    proptest! {
        // Any delivery order, with any amount of duplication, converges on the
        // highest version.
        #[test]
        fn prop_converges_to_max_version(
            writes in proptest::collection::vec((1u64..50, 1u128..4), 1..40),
            dup_factor in 1usize..3,
            seed in any::<u64>(),
        ) {
            let mut deliveries: Vec<Entry> = writes
                .iter()
                .enumerate()
                .flat_map(|(i, (order, node))| {
                    std::iter::repeat(entry(9, i as u8, *order, *node)).take(dup_factor)
                })
                .collect();
            // Deterministic shuffle driven by the seed.
            let mut state = seed | 1;
            for i in (1..deliveries.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                deliveries.swap(i, (state % (i as u64 + 1)) as usize);
            }

            let store = VersionedStore::new();
            for d in deliveries.clone() {
                store.install(d);
            }

            let winner = deliveries.iter().max_by_key(|e| e.version).unwrap();
            let stored = store.get(&CacheKey::from_bytes(vec![9])).unwrap();
            prop_assert_eq!(stored.version, winner.version);
        }
    }
}
