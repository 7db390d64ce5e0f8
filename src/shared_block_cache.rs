//! SharedBlockCache: self-locking `GenericBlockCache` for concurrent
//! recorders.
//!
//! Every operation takes the spinlock for one hash probe. References
//! returned by `lookup`/`get` stay valid after the lock is released: blocks
//! sit in arena storage that never relocates and they are never mutated or
//! dropped before the cache itself.

use crate::block_cache::GenericBlockCache;
use crate::error::InsertError;
use crate::handle::Index;
use crate::spinlock::SpinMutex;
use core::hash::{BuildHasher, Hash};
use std::collections::hash_map::RandomState;

pub struct SharedBlockCache<T, S = RandomState> {
    inner: SpinMutex<GenericBlockCache<T, S>>,
}

impl<T> SharedBlockCache<T>
where
    T: Hash + Eq,
{
    pub fn new() -> Self {
        Self::from_cache(GenericBlockCache::new())
    }
}

impl<T> Default for SharedBlockCache<T>
where
    T: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> SharedBlockCache<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    pub fn from_cache(cache: GenericBlockCache<T, S>) -> Self {
        Self {
            inner: SpinMutex::new(cache),
        }
    }

    pub fn with_hasher(hasher: S) -> Self {
        Self::from_cache(GenericBlockCache::with_hasher(hasher))
    }

    pub fn insert(&self, block: T) -> Result<Index, InsertError> {
        self.inner.lock().insert(block)
    }

    pub fn find(&self, block: &T) -> Option<Index> {
        self.inner.lock().find(block)
    }

    pub fn count(&self) -> usize {
        self.inner.lock().count()
    }

    /// # Panics
    /// If `index` was not issued by this cache.
    #[track_caller]
    pub fn lookup(&self, index: Index) -> &T
    where
        T: Sync,
    {
        let ptr: *const T = self.inner.lock().lookup(index);
        // SAFETY: the block lives in arena storage owned by `self.inner`
        // that never moves or frees an element while `self` is alive, and
        // no API hands out `&mut T` to stored blocks. `T: Sync` makes the
        // shared reference safe to use from any thread.
        unsafe { &*ptr }
    }

    pub fn get(&self, index: Index) -> Option<&T>
    where
        T: Sync,
    {
        let ptr: *const T = self.inner.lock().get(index)?;
        // SAFETY: same as `lookup`.
        Some(unsafe { &*ptr })
    }

    pub fn validate(&self) {
        self.inner.lock().validate();
    }

    pub fn into_inner(self) -> GenericBlockCache<T, S> {
        self.inner.into_inner()
    }
}
