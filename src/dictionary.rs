//! KeyedEntryDictionary: concurrent map from serialized shader keys to
//! immutable, arena-allocated `Entry` records.
//!
//! All state sits behind one `parking_lot::Mutex`. Lookups and inserts are
//! a single hash probe, so the lock is held briefly; the workload is
//! write-seldom, read-often.
//!
//! Entries are allocated from a `ChunkedArena` and are never moved,
//! mutated or freed before the dictionary itself, which is what lets
//! `find_or_create`/`lookup` return plain references tied to `&self` after
//! the lock is released. Arena position `p` holds the entry with
//! `UniqueId(p + 1)`, so the arena doubles as the id-indexed reverse
//! lookup and id `0` stays reserved.
//!
//! The dictionary also keeps the runtime-effect snippet registry: a map from
//! `{program hash, uniform size}` to a user-defined snippet id.

use crate::arena::{ChunkedArena, DEFAULT_CHUNK_SIZE};
use crate::error::InsertError;
use crate::handle::UniqueId;
use core::fmt;
use core::hash::BuildHasher;
use hashbrown::hash_table::Entry as TableEntry;
use hashbrown::HashTable;
use parking_lot::Mutex;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;

/// One dictionary record: a copy of the key, its id, and caller data.
pub struct Entry<D = ()> {
    key: Box<[u8]>,
    id: UniqueId,
    hash: u64,
    data: D,
}

impl<D> Entry<D> {
    fn new(key: &[u8], hash: u64, data: D) -> Self {
        Self {
            key: key.into(),
            id: UniqueId::INVALID,
            hash,
            data,
        }
    }

    fn set_unique_id(&mut self, id: UniqueId) {
        assert!(
            !self.id.is_valid(),
            "entry already has unique id {}",
            self.id.as_u32()
        );
        assert!(id.is_valid(), "cannot assign the sentinel id");
        self.id = id;
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn unique_id(&self) -> UniqueId {
        self.id
    }

    pub fn data(&self) -> &D {
        &self.data
    }
}

impl<D: fmt::Debug> fmt::Debug for Entry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("key_len", &self.key.len())
            .field("data", &self.data)
            .finish()
    }
}

/// Identity of a runtime effect for snippet registration. Two effects with
/// colliding program hashes still need matching uniform sizes to share a
/// snippet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RuntimeEffectKey {
    pub program_hash: u64,
    pub uniform_size: usize,
}

#[derive(Clone, Debug)]
pub struct DictionaryOptions {
    /// Entries per arena chunk.
    pub arena_chunk_size: usize,
    /// Snippet ids below this value belong to built-in snippets; runtime
    /// effects are numbered from here.
    pub builtin_snippet_count: u32,
}

impl Default for DictionaryOptions {
    fn default() -> Self {
        Self {
            arena_chunk_size: DEFAULT_CHUNK_SIZE,
            builtin_snippet_count: 0,
        }
    }
}

struct Inner<D, S> {
    hasher: S,
    index: HashTable<UniqueId>,
    entries: ChunkedArena<Entry<D>>,
    snippets: HashMap<RuntimeEffectKey, u32>,
    builtin_snippet_count: u32,
    limit: u32,
}

impl<D, S: BuildHasher> Inner<D, S> {
    #[inline]
    fn entry(entries: &ChunkedArena<Entry<D>>, id: UniqueId) -> Option<&Entry<D>> {
        if !id.is_valid() {
            return None;
        }
        entries.get(id.as_u32() as usize - 1)
    }

    fn validate(&self) {
        assert_eq!(
            self.index.len(),
            self.entries.len(),
            "dictionary index and arena disagree on count"
        );
        for (pos, e) in self.entries.iter().enumerate() {
            let expect = UniqueId::new(pos as u32 + 1);
            assert_eq!(e.id, expect, "entry at position {pos} has wrong id");
            assert_eq!(
                self.hasher.hash_one(&*e.key),
                e.hash,
                "stored hash of entry {} is stale",
                expect.as_u32()
            );
            assert!(
                self.index.find(e.hash, |&id| id == expect).is_some(),
                "entry {} missing from index",
                expect.as_u32()
            );
        }
    }
}

pub struct KeyedEntryDictionary<D = (), S = RandomState> {
    inner: Mutex<Inner<D, S>>,
}

impl<D> KeyedEntryDictionary<D>
where
    D: Send + Sync,
{
    pub fn new() -> Self {
        Self::with_options(DictionaryOptions::default())
    }

    pub fn with_chunk_size(arena_chunk_size: usize) -> Self {
        Self::with_options(DictionaryOptions {
            arena_chunk_size,
            ..DictionaryOptions::default()
        })
    }

    pub fn with_options(options: DictionaryOptions) -> Self {
        Self::with_options_and_hasher(options, RandomState::new())
    }
}

impl<D> Default for KeyedEntryDictionary<D>
where
    D: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<D, S> KeyedEntryDictionary<D, S>
where
    D: Send + Sync,
    S: BuildHasher,
{
    pub fn with_options_and_hasher(options: DictionaryOptions, hasher: S) -> Self {
        Self {
            inner: Mutex::new(Inner {
                hasher,
                index: HashTable::new(),
                entries: ChunkedArena::with_chunk_size(options.arena_chunk_size),
                snippets: HashMap::new(),
                builtin_snippet_count: options.builtin_snippet_count,
                limit: u32::MAX,
            }),
        }
    }

    /// Cap the number of entries; creating more fails with
    /// `HandleSpaceExhausted`.
    pub fn with_handle_limit(self, limit: u32) -> Self {
        self.inner.lock().limit = limit;
        self
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn arena_chunk_size(&self) -> usize {
        self.inner.lock().entries.chunk_size()
    }

    /// Entry for `key`, creating it with `D::default()` when absent.
    pub fn find_or_create(&self, key: &[u8]) -> Result<&Entry<D>, InsertError>
    where
        D: Default,
    {
        self.find_or_create_with(key, D::default)
    }

    /// Entry for `key`, creating it with `make()` when absent. `make` runs
    /// under the dictionary lock and must not call back into it.
    pub fn find_or_create_with<F>(&self, key: &[u8], make: F) -> Result<&Entry<D>, InsertError>
    where
        F: FnOnce() -> D,
    {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let hash = inner.hasher.hash_one(key);
        let entries = &inner.entries;
        let ptr: *const Entry<D> = match inner.index.entry(
            hash,
            |&id| Inner::<D, S>::entry(entries, id).is_some_and(|e| &*e.key == key),
            |&id| Inner::<D, S>::entry(entries, id).map_or(0, |e| e.hash),
        ) {
            TableEntry::Occupied(o) => {
                let found = Inner::<D, S>::entry(entries, *o.get());
                match found {
                    Some(e) => e,
                    None => unreachable!("index refers to a missing entry"),
                }
            }
            TableEntry::Vacant(v) => {
                let pos = inner.entries.len();
                if pos >= inner.limit as usize {
                    tracing::warn!(limit = inner.limit, "dictionary handle space exhausted");
                    return Err(InsertError::HandleSpaceExhausted { limit: inner.limit });
                }
                let id = UniqueId::new(pos as u32 + 1);
                let mut entry = Entry::new(key, hash, make());
                entry.set_unique_id(id);
                let allocated = inner.entries.alloc(entry);
                debug_assert_eq!(allocated, pos);
                v.insert(id);
                tracing::trace!(id = id.as_u32(), key_len = key.len(), "dictionary created entry");
                match inner.entries.get(pos) {
                    Some(e) => e,
                    None => unreachable!("entry allocated above"),
                }
            }
        };
        #[cfg(debug_assertions)]
        inner.validate();
        drop(guard);
        // SAFETY: the entry lives in arena storage owned by `self.inner`; the
        // arena never moves or frees an element while `self` is alive and no
        // API mutates an entry after creation. `D: Sync` lets the reference
        // cross threads.
        Ok(unsafe { &*ptr })
    }

    /// Entry for `id`, or `None` for the sentinel.
    pub fn lookup(&self, id: UniqueId) -> Option<&Entry<D>> {
        if !id.is_valid() {
            return None;
        }
        let guard = self.inner.lock();
        debug_assert!(
            (id.as_u32() as usize) <= guard.entries.len(),
            "unique id {} was not issued by this dictionary",
            id.as_u32()
        );
        let ptr: *const Entry<D> = Inner::<D, S>::entry(&guard.entries, id)?;
        drop(guard);
        // SAFETY: see `find_or_create_with`.
        Some(unsafe { &*ptr })
    }

    /// Snippet id for a runtime effect, registering the effect on first use.
    pub fn find_or_create_snippet(&self, key: RuntimeEffectKey) -> Result<u32, InsertError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(&id) = inner.snippets.get(&key) {
            return Ok(id);
        }
        let id = inner
            .builtin_snippet_count
            .checked_add(inner.snippets.len() as u32)
            .ok_or(InsertError::HandleSpaceExhausted { limit: u32::MAX })?;
        inner.snippets.insert(key, id);
        tracing::trace!(snippet = id, "registered runtime effect snippet");
        Ok(id)
    }

    /// Number of runtime-effect snippets registered so far.
    pub fn snippet_count(&self) -> usize {
        self.inner.lock().snippets.len()
    }

    /// Panics if the index, arena and ids disagree.
    pub fn validate(&self) {
        self.inner.lock().validate();
    }
}
