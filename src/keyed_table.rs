//! KeyedTable: structural keyed map with stable generational handles.
//!
//! Records live in a `SlotMap`; a `HashTable` of slot keys indexed by each
//! record's stored hash gives O(1) average lookup by key without rehashing
//! user keys. Removal unlinks the index first, so the table is consistent
//! again before any removed key or value is handed back (and dropped by the
//! caller).
//!
//! The table has no guard of its own; its owner serializes access.

use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use hashbrown::hash_table::Entry as TableEntry;
use hashbrown::HashTable;
use slotmap::{DefaultKey, SlotMap};
use std::collections::hash_map::RandomState;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct Handle(DefaultKey);

#[derive(Debug)]
struct Record<K, V> {
    key: K,
    value: V,
    hash: u64,
}

pub(crate) struct KeyedTable<K, V, S = RandomState> {
    hasher: S,
    index: HashTable<DefaultKey>,
    slots: SlotMap<DefaultKey, Record<K, V>>,
}

impl<K, V, S> KeyedTable<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub(crate) fn with_hasher(hasher: S) -> Self {
        Self {
            hasher,
            index: HashTable::new(),
            slots: SlotMap::with_key(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn find<Q>(&self, q: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hasher.hash_one(q);
        self.index
            .find(hash, |&k| {
                self.slots
                    .get(k)
                    .map(|r| r.key.borrow() == q)
                    .unwrap_or(false)
            })
            .map(|&k| Handle(k))
    }

    /// Handle for `key`, inserting `default()` if absent. The flag is true
    /// when a new record was created; `default` only runs in that case.
    pub(crate) fn get_or_insert_with<F>(&mut self, key: K, default: F) -> (Handle, bool)
    where
        F: FnOnce() -> V,
    {
        let hash = self.hasher.hash_one(&key);
        match self.index.entry(
            hash,
            |&kk| self.slots.get(kk).map(|r| r.key == key).unwrap_or(false),
            |&kk| self.slots.get(kk).map(|r| r.hash).unwrap_or(0),
        ) {
            TableEntry::Occupied(o) => (Handle(*o.get()), false),
            TableEntry::Vacant(v) => {
                let value = default();
                let k = self.slots.insert(Record { key, value, hash });
                let _ = v.insert(k);
                (Handle(k), true)
            }
        }
    }

    pub(crate) fn get_mut(&mut self, h: Handle) -> Option<&mut V> {
        self.slots.get_mut(h.0).map(|r| &mut r.value)
    }

    pub(crate) fn remove(&mut self, h: Handle) -> Option<(K, V)> {
        let hash = self.slots.get(h.0)?.hash;

        // Unlink from the index before taking the record out of its slot.
        if let Ok(o) = self.index.find_entry(hash, |&kk| kk == h.0) {
            let _ = o.remove();
        }
        self.slots.remove(h.0).map(|r| (r.key, r.value))
    }

    /// Remove every record matching `pred`; removed pairs are returned so
    /// the caller controls where they drop.
    pub(crate) fn remove_where<F>(&mut self, mut pred: F) -> Vec<(K, V)>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let doomed: Vec<Handle> = self
            .slots
            .iter()
            .filter(|(_, r)| pred(&r.key, &r.value))
            .map(|(k, _)| Handle(k))
            .collect();
        doomed.into_iter().filter_map(|h| self.remove(h)).collect()
    }

    pub(crate) fn take_all(&mut self) -> Vec<(K, V)> {
        self.index.clear();
        self.slots.drain().map(|(_, r)| (r.key, r.value)).collect()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots.iter().map(|(_, r)| (&r.key, &r.value))
    }

    pub(crate) fn validate(&self) {
        assert_eq!(
            self.index.len(),
            self.slots.len(),
            "table index and slots disagree on count"
        );
        for (k, r) in self.slots.iter() {
            assert!(
                self.index.find(r.hash, |&kk| kk == k).is_some(),
                "record missing from table index"
            );
        }
    }
}
