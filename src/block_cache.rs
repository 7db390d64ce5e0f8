//! GenericBlockCache: content-addressed storage that issues stable `Index`
//! handles for any `Hash + Eq` block.
//!
//! Blocks live in a `ChunkedArena` in insertion order; a `HashTable` of
//! `Index` values keyed by each block's stored hash provides the
//! content lookup. Position `p` in the arena carries `Index(p + 1)`, which
//! keeps `0` free as the sentinel.
//!
//! No internal locking: `insert` takes `&mut self`. Wrap in a lock or use
//! `SharedBlockCache` for multi-threaded recording.

use crate::arena::{ChunkedArena, DEFAULT_CHUNK_SIZE};
use crate::error::InsertError;
use crate::handle::Index;
use crate::reentrancy::DebugReentrancy;
use core::hash::{BuildHasher, Hash};
use hashbrown::hash_table::Entry;
use hashbrown::HashTable;
use std::collections::hash_map::RandomState;

/// Largest number of unique blocks a cache can hold: every non-zero `u32`.
pub const MAX_HANDLES: u32 = u32::MAX;

struct Stored<T> {
    block: T,
    hash: u64,
}

pub struct GenericBlockCache<T, S = RandomState> {
    hasher: S,
    index: HashTable<Index>,
    blocks: ChunkedArena<Stored<T>>,
    limit: u32,
    reentrancy: DebugReentrancy,
}

impl<T> GenericBlockCache<T>
where
    T: Hash + Eq,
{
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self::with_chunk_size_and_hasher(chunk_size, Default::default())
    }
}

impl<T> Default for GenericBlockCache<T>
where
    T: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> GenericBlockCache<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_chunk_size_and_hasher(DEFAULT_CHUNK_SIZE, hasher)
    }

    pub fn with_chunk_size_and_hasher(chunk_size: usize, hasher: S) -> Self {
        Self {
            hasher,
            index: HashTable::new(),
            blocks: ChunkedArena::with_chunk_size(chunk_size),
            limit: MAX_HANDLES,
            reentrancy: DebugReentrancy::new(),
        }
    }

    /// Cap the number of unique blocks; inserts past it fail with
    /// `HandleSpaceExhausted`. Clamped to `MAX_HANDLES`.
    pub fn with_handle_limit(mut self, limit: u32) -> Self {
        self.limit = limit.min(MAX_HANDLES);
        self
    }

    /// Number of unique blocks (the sentinel is not counted).
    pub fn count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.len() == 0
    }

    #[inline]
    fn stored(blocks: &ChunkedArena<Stored<T>>, index: Index) -> Option<&Stored<T>> {
        if !index.is_valid() {
            return None;
        }
        blocks.get(index.as_u32() as usize - 1)
    }

    /// Return the handle for `block`, storing it if no equal block exists.
    pub fn insert(&mut self, block: T) -> Result<Index, InsertError> {
        let idx = {
            let _g = self.reentrancy.enter();
            let hash = self.hasher.hash_one(&block);
            let blocks = &self.blocks;
            match self.index.entry(
                hash,
                |&i| Self::stored(blocks, i).is_some_and(|s| s.block == block),
                |&i| Self::stored(blocks, i).map_or(0, |s| s.hash),
            ) {
                Entry::Occupied(o) => return Ok(*o.get()),
                Entry::Vacant(v) => {
                    if self.blocks.len() >= self.limit as usize {
                        tracing::warn!(limit = self.limit, "block cache handle space exhausted");
                        return Err(InsertError::HandleSpaceExhausted { limit: self.limit });
                    }
                    let pos = self.blocks.alloc(Stored { block, hash });
                    let idx = Index::new(pos as u32 + 1);
                    v.insert(idx);
                    idx
                }
            }
        };
        tracing::trace!(index = idx.as_u32(), "block cache issued new index");
        #[cfg(debug_assertions)]
        self.validate();
        Ok(idx)
    }

    /// Handle of a block equal to `block`, if one is stored.
    pub fn find(&self, block: &T) -> Option<Index> {
        let _g = self.reentrancy.enter();
        let hash = self.hasher.hash_one(block);
        self.index
            .find(hash, |&i| {
                Self::stored(&self.blocks, i).is_some_and(|s| &s.block == block)
            })
            .copied()
    }

    /// Block stored under `index`.
    ///
    /// # Panics
    /// If `index` is the sentinel or was not issued by this cache.
    #[track_caller]
    pub fn lookup(&self, index: Index) -> &T {
        match self.get(index) {
            Some(b) => b,
            None => panic!(
                "block index {} out of range (count {})",
                index.as_u32(),
                self.blocks.len()
            ),
        }
    }

    pub fn get(&self, index: Index) -> Option<&T> {
        Self::stored(&self.blocks, index).map(|s| &s.block)
    }

    /// Blocks with their handles, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Index, &T)> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .map(|(pos, s)| (Index::new(pos as u32 + 1), &s.block))
    }

    /// Cross-check the hash index against block storage. Panics on any
    /// inconsistency. Uses only stored hashes; never calls `T: Hash/Eq`.
    pub fn validate(&self) {
        assert_eq!(
            self.index.len(),
            self.blocks.len(),
            "index and block storage disagree on count"
        );
        for &i in self.index.iter() {
            assert!(i.is_valid(), "sentinel index registered in hash index");
            assert!(
                Self::stored(&self.blocks, i).is_some(),
                "hash index holds unissued index {}",
                i.as_u32()
            );
        }
        for (pos, s) in self.blocks.iter().enumerate() {
            let expect = Index::new(pos as u32 + 1);
            assert!(
                self.index.find(s.hash, |&i| i == expect).is_some(),
                "block {} missing from hash index",
                expect.as_u32()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::Hasher;

    #[derive(Clone, Default)]
    struct ConstBuildHasher;
    struct ConstHasher;
    impl BuildHasher for ConstBuildHasher {
        type Hasher = ConstHasher;
        fn build_hasher(&self) -> Self::Hasher {
            ConstHasher
        }
    }
    impl Hasher for ConstHasher {
        fn write(&mut self, _bytes: &[u8]) {}
        fn finish(&self) -> u64 {
            0
        } // force all blocks into the same hash bucket
    }

    /// Scenario: two distinct colors and a byte-identical copy of the first.
    #[test]
    fn uniform_strings_dedup_in_insertion_order() {
        let mut c: GenericBlockCache<String> = GenericBlockCache::new();
        let u1 = "rgba(1,0,0,1)".to_string();
        let u2 = "rgba(0,0,1,1)".to_string();
        let u3 = u1.clone();
        assert_eq!(c.insert(u1.clone()).unwrap().as_u32(), 1);
        assert_eq!(c.insert(u2.clone()).unwrap().as_u32(), 2);
        assert_eq!(c.insert(u3).unwrap().as_u32(), 1);
        assert_eq!(c.count(), 2);
        assert_eq!(c.lookup(Index::new(1)), &u1);
        assert_eq!(c.lookup(Index::new(2)), &u2);
    }

    /// Invariant: a fresh cache is empty and never hands out the sentinel.
    #[test]
    fn fresh_cache_is_empty_and_sentinel_never_issued() {
        let mut c: GenericBlockCache<u32> = GenericBlockCache::new();
        assert_eq!(c.count(), 0);
        assert!(c.is_empty());
        assert!(c.get(Index::INVALID).is_none());
        for v in 0..50 {
            let i = c.insert(v).unwrap();
            assert_ne!(i, Index::INVALID);
        }
        assert!(c.get(Index::INVALID).is_none());
    }

    /// Invariant: equal content collapses to one handle; forced hash
    /// collisions still keep distinct content apart.
    #[test]
    fn collisions_do_not_merge_distinct_blocks() {
        let mut c: GenericBlockCache<String, ConstBuildHasher> =
            GenericBlockCache::with_hasher(ConstBuildHasher);
        let a = c.insert("a".to_string()).unwrap();
        let b = c.insert("b".to_string()).unwrap();
        let a2 = c.insert("a".to_string()).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a2);
        assert_eq!(c.count(), 2);
        assert_eq!(c.lookup(a), "a");
        assert_eq!(c.lookup(b), "b");
        assert_eq!(c.find(&"b".to_string()), Some(b));
        assert_eq!(c.find(&"c".to_string()), None);
    }

    #[test]
    fn find_does_not_insert() {
        let mut c: GenericBlockCache<Vec<u8>> = GenericBlockCache::new();
        assert_eq!(c.find(&vec![1, 2]), None);
        assert_eq!(c.count(), 0);
        let i = c.insert(vec![1, 2]).unwrap();
        assert_eq!(c.find(&vec![1, 2]), Some(i));
    }

    #[test]
    fn iter_yields_insertion_order() {
        let mut c: GenericBlockCache<&'static str> = GenericBlockCache::with_chunk_size(2);
        for s in ["x", "y", "x", "z", "y"] {
            c.insert(s).unwrap();
        }
        let seen: Vec<_> = c.iter().map(|(i, s)| (i.as_u32(), *s)).collect();
        assert_eq!(seen, vec![(1, "x"), (2, "y"), (3, "z")]);
    }

    /// Invariant: blocks never move once stored.
    #[test]
    fn stored_blocks_keep_their_address() {
        let mut c: GenericBlockCache<String> = GenericBlockCache::with_chunk_size(8);
        let first = c.insert("first".to_string()).unwrap();
        let addr = c.lookup(first) as *const String;
        for i in 0..500 {
            c.insert(format!("b{i}")).unwrap();
        }
        assert_eq!(c.lookup(first) as *const String, addr);
    }

    #[test]
    fn exhausted_handle_space_rejects_new_blocks_only() {
        let mut c: GenericBlockCache<u8> = GenericBlockCache::new().with_handle_limit(2);
        let a = c.insert(1).unwrap();
        c.insert(2).unwrap();
        assert_eq!(
            c.insert(3),
            Err(InsertError::HandleSpaceExhausted { limit: 2 })
        );
        // Equal content still resolves to its existing handle.
        assert_eq!(c.insert(1), Ok(a));
        assert_eq!(c.count(), 2);
        c.validate();
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn lookup_of_unissued_index_panics() {
        let mut c: GenericBlockCache<u8> = GenericBlockCache::new();
        c.insert(9).unwrap();
        let _ = c.lookup(Index::new(2));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn lookup_of_sentinel_panics() {
        let c: GenericBlockCache<u8> = GenericBlockCache::new();
        let _ = c.lookup(Index::INVALID);
    }

    /// Invariant (debug-only): a block whose `Eq` re-enters the cache during
    /// a probe trips the reentrancy guard.
    #[cfg(debug_assertions)]
    #[test]
    fn reentrancy_panics_from_eq_during_find() {
        struct ReentryBlock {
            id: &'static str,
            cache: *const GenericBlockCache<ReentryBlock, ConstBuildHasher>,
            trigger: bool,
        }
        impl PartialEq for ReentryBlock {
            fn eq(&self, other: &Self) -> bool {
                if self.id == other.id {
                    return true;
                }
                let probe = if other.trigger { other } else { self };
                if probe.trigger {
                    // Attempt to re-enter the same cache during probing.
                    unsafe {
                        let c = &*probe.cache;
                        let _ = c.find(probe);
                    }
                }
                false
            }
        }
        impl Eq for ReentryBlock {}
        impl Hash for ReentryBlock {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }

        let mut c: GenericBlockCache<ReentryBlock, ConstBuildHasher> =
            GenericBlockCache::with_hasher(ConstBuildHasher);
        c.insert(ReentryBlock {
            id: "a",
            cache: core::ptr::null(),
            trigger: false,
        })
        .unwrap();

        let query = ReentryBlock {
            id: "b",
            cache: &c as *const _,
            trigger: true,
        };
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = c.find(&query);
        }));
        assert!(res.is_err(), "expected reentrancy to panic in debug builds");
    }
}
