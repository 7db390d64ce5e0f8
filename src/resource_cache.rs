//! UniquelyKeyedResourceCache: thread-safe map from explicit keys to shared
//! resource views.
//!
//! Recording threads race to build the same resource: each one looks the
//! key up, builds a candidate on a miss, then calls `add`. Whichever `add`
//! observes the key absent under the lock installs its candidate; every
//! other caller gets that winner back and its own candidate is dropped.
//!
//! Views are `Arc`s. The cache holds one reference per record; bulk
//! invalidation releases the cache's references, and views still held
//! elsewhere stay alive through those owners. Released records are always
//! dropped after the lock is released, so a view's destructor may call
//! back into the cache.
//!
//! A record's presence says nothing about whether the backing GPU resource
//! exists yet; views may be lazy.

use crate::keyed_table::KeyedTable;
use crate::spinlock::SpinMutex;
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use std::collections::hash_map::RandomState;
use std::sync::Arc;
use std::time::Instant;

struct CacheRecord<V, D> {
    view: Arc<V>,
    data: Option<Arc<D>>,
    last_access: Instant,
}

impl<V, D> CacheRecord<V, D> {
    fn new(view: Arc<V>, data: Option<Arc<D>>) -> Self {
        Self {
            view,
            data,
            last_access: Instant::now(),
        }
    }

    fn is_uniquely_held(&self) -> bool {
        Arc::strong_count(&self.view) == 1
    }
}

pub struct UniquelyKeyedResourceCache<K, V, D = (), S = RandomState> {
    table: SpinMutex<KeyedTable<K, CacheRecord<V, D>, S>>,
}

impl<K, V, D> UniquelyKeyedResourceCache<K, V, D>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K, V, D> Default for UniquelyKeyedResourceCache<K, V, D>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, D, S> UniquelyKeyedResourceCache<K, V, D, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            table: SpinMutex::new(KeyedTable::with_hasher(hasher)),
        }
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The view stored under `key`, or `None` ("go create it").
    pub fn find<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.find_with_data(key).0
    }

    /// The view and custom data stored under `key`.
    pub fn find_with_data<Q>(&self, key: &Q) -> (Option<Arc<V>>, Option<Arc<D>>)
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let mut table = self.table.lock();
        let Some(h) = table.find(key) else {
            return (None, None);
        };
        match table.get_mut(h) {
            Some(r) => {
                r.last_access = Instant::now();
                (Some(r.view.clone()), r.data.clone())
            }
            None => (None, None),
        }
    }

    /// Install `candidate` under `key` unless a record already exists, and
    /// return whichever view is now authoritative. A losing candidate is
    /// dropped.
    pub fn add(&self, key: K, candidate: Arc<V>) -> Arc<V> {
        self.add_with_data(key, candidate, None, |_, _| false).0
    }

    /// Like `add`, but also attaches `data`. When a record already exists and
    /// both incumbent and challenger carry data, `is_newer_better(old, new)`
    /// decides whether the challenger replaces the incumbent.
    pub fn add_with_data<F>(
        &self,
        key: K,
        candidate: Arc<V>,
        data: Option<Arc<D>>,
        is_newer_better: F,
    ) -> (Arc<V>, Option<Arc<D>>)
    where
        F: FnOnce(&D, &D) -> bool,
    {
        let mut replaced = None;
        let result = {
            let mut table = self.table.lock();
            let (h, inserted) = table.get_or_insert_with(key, || {
                CacheRecord::new(candidate.clone(), data.clone())
            });
            let Some(r) = table.get_mut(h) else {
                unreachable!("record returned by get_or_insert_with is live");
            };
            if inserted {
                tracing::trace!("resource cache installed new view");
            } else {
                r.last_access = Instant::now();
                let newer = match (&r.data, &data) {
                    (Some(old), Some(new)) => is_newer_better(&**old, &**new),
                    _ => false,
                };
                if newer {
                    tracing::trace!("resource cache replaced view with newer data");
                    let old_view = std::mem::replace(&mut r.view, candidate.clone());
                    let old_data = std::mem::replace(&mut r.data, data.clone());
                    replaced = Some((old_view, old_data));
                }
            }
            let result = (r.view.clone(), r.data.clone());
            #[cfg(debug_assertions)]
            table.validate();
            result
        };
        // The replaced record and any losing candidate drop here, unlocked.
        drop(replaced);
        drop(candidate);
        result
    }

    /// Return the view for `key`, building one with `make` on a miss. `make`
    /// runs without the lock held; if another thread installs a view first,
    /// that view wins and the freshly built one is dropped.
    pub fn find_or_add_with<F>(&self, key: K, make: F) -> Arc<V>
    where
        F: FnOnce() -> Arc<V>,
    {
        if let Some(v) = self.find(&key) {
            return v;
        }
        let candidate = make();
        self.add(key, candidate)
    }

    /// `find_or_add_with` for views with custom data. `make` builds the
    /// candidate view and data outside the lock; on a hit it is not called
    /// and the stored view and data are returned.
    pub fn find_or_add_with_data<G, F>(
        &self,
        key: K,
        make: G,
        is_newer_better: F,
    ) -> (Arc<V>, Option<Arc<D>>)
    where
        G: FnOnce() -> (Arc<V>, Option<Arc<D>>),
        F: FnOnce(&D, &D) -> bool,
    {
        if let (Some(view), data) = self.find_with_data(&key) {
            return (view, data);
        }
        let (candidate, data) = make();
        self.add_with_data(key, candidate, data, is_newer_better)
    }

    /// Remove the record for `key`. Returns true if one was present.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let removed = {
            let mut table = self.table.lock();
            table.find(key).and_then(|h| table.remove(h))
        };
        removed.is_some()
    }

    /// Release the cache's reference to every view and clear the table.
    pub fn drop_all_refs(&self) {
        let released = self.table.lock().take_all();
        tracing::debug!(released = released.len(), "resource cache dropped all refs");
        drop(released);
    }

    /// Release only records whose view has no owner besides the cache.
    pub fn drop_unique_refs(&self) {
        let released = self.table.lock().remove_where(|_, r| r.is_uniquely_held());
        tracing::debug!(released = released.len(), "resource cache dropped unique refs");
        drop(released);
    }

    /// Release uniquely held records last accessed before `purge_time`.
    pub fn drop_unique_refs_older_than(&self, purge_time: Instant) {
        let released = self
            .table
            .lock()
            .remove_where(|_, r| r.is_uniquely_held() && r.last_access < purge_time);
        tracing::debug!(
            released = released.len(),
            "resource cache dropped stale unique refs"
        );
        drop(released);
    }

    /// Panics if the table's index and storage disagree.
    pub fn validate(&self) {
        let table = self.table.lock();
        table.validate();
        debug_assert!(table.iter().all(|(_, r)| Arc::strong_count(&r.view) >= 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::Hasher;
    use std::time::Duration;

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
        }
    }

    #[derive(Debug, PartialEq)]
    struct Mask {
        radius: u32,
    }

    #[test]
    fn find_on_empty_cache_is_none() {
        let c: UniquelyKeyedResourceCache<String, Mask> = UniquelyKeyedResourceCache::new();
        assert!(c.find("blurMask_r5").is_none());
        assert!(c.is_empty());
    }

    /// Invariant: the first `add` wins; later candidates are dropped and the
    /// winner is returned by identity.
    #[test]
    fn second_add_adopts_first_view() {
        let c: UniquelyKeyedResourceCache<String, Mask> = UniquelyKeyedResourceCache::new();
        let a = Arc::new(Mask { radius: 5 });
        let b = Arc::new(Mask { radius: 5 });
        let got_a = c.add("blurMask_r5".into(), a.clone());
        let got_b = c.add("blurMask_r5".into(), b.clone());
        assert!(Arc::ptr_eq(&got_a, &a));
        assert!(Arc::ptr_eq(&got_b, &a));
        // Only the caller's handle to `b` remains.
        assert_eq!(Arc::strong_count(&b), 1);
        assert!(Arc::ptr_eq(&c.find("blurMask_r5").unwrap(), &a));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn newer_data_can_replace_incumbent() {
        let c: UniquelyKeyedResourceCache<&'static str, Mask, u32> =
            UniquelyKeyedResourceCache::new();
        let newer = |old: &u32, new: &u32| new > old;
        let v1 = Arc::new(Mask { radius: 1 });
        let v2 = Arc::new(Mask { radius: 2 });
        let v3 = Arc::new(Mask { radius: 3 });

        let (w, d) = c.add_with_data("verts", v1.clone(), Some(Arc::new(10)), newer);
        assert!(Arc::ptr_eq(&w, &v1));
        assert_eq!(d.as_deref(), Some(&10));

        // Older data loses.
        let (w, d) = c.add_with_data("verts", v2.clone(), Some(Arc::new(5)), newer);
        assert!(Arc::ptr_eq(&w, &v1));
        assert_eq!(d.as_deref(), Some(&10));

        // Newer data wins and becomes visible to `find`.
        let (w, d) = c.add_with_data("verts", v3.clone(), Some(Arc::new(20)), newer);
        assert!(Arc::ptr_eq(&w, &v3));
        assert_eq!(d.as_deref(), Some(&20));
        let (found, data) = c.find_with_data("verts");
        assert!(Arc::ptr_eq(&found.unwrap(), &v3));
        assert_eq!(data.as_deref(), Some(&20));

        // Without challenger data the incumbent is kept.
        let (w, _) = c.add_with_data("verts", v2, None, newer);
        assert!(Arc::ptr_eq(&w, &v3));
    }

    #[test]
    fn colliding_keys_keep_their_own_views() {
        let c: UniquelyKeyedResourceCache<String, Mask, (), ConstBuildHasher> =
            UniquelyKeyedResourceCache::with_hasher(ConstBuildHasher);
        let x = c.add("x".into(), Arc::new(Mask { radius: 1 }));
        let y = c.add("y".into(), Arc::new(Mask { radius: 2 }));
        assert!(!Arc::ptr_eq(&x, &y));
        let x2 = c.add("x".into(), Arc::new(Mask { radius: 3 }));
        assert!(Arc::ptr_eq(&x, &x2));

        assert!(c.remove("x"));
        assert!(c.find("x").is_none());
        assert!(Arc::ptr_eq(&c.find("y").unwrap(), &y));
        assert_eq!(c.len(), 1);
        c.validate();
    }

    #[test]
    fn remove_forgets_key() {
        let c: UniquelyKeyedResourceCache<String, Mask> = UniquelyKeyedResourceCache::new();
        c.add("k".into(), Arc::new(Mask { radius: 1 }));
        assert!(c.remove("k"));
        assert!(!c.remove("k"));
        assert!(c.find("k").is_none());
    }

    #[test]
    fn find_or_add_with_builds_only_on_miss() {
        let c: UniquelyKeyedResourceCache<String, Mask> = UniquelyKeyedResourceCache::new();
        let mut built = 0;
        let a = c.find_or_add_with("k".into(), || {
            built += 1;
            Arc::new(Mask { radius: 9 })
        });
        let b = c.find_or_add_with("k".into(), || {
            built += 1;
            Arc::new(Mask { radius: 9 })
        });
        assert_eq!(built, 1);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn find_or_add_with_data_builds_only_on_miss() {
        let c: UniquelyKeyedResourceCache<&'static str, Mask, u32> =
            UniquelyKeyedResourceCache::new();
        let newer = |old: &u32, new: &u32| new > old;
        let mut built = 0;
        let (v1, d1) = c.find_or_add_with_data(
            "verts",
            || {
                built += 1;
                (Arc::new(Mask { radius: 1 }), Some(Arc::new(3)))
            },
            newer,
        );
        let (v2, d2) = c.find_or_add_with_data(
            "verts",
            || {
                built += 1;
                (Arc::new(Mask { radius: 2 }), Some(Arc::new(9)))
            },
            newer,
        );
        assert_eq!(built, 1);
        assert!(Arc::ptr_eq(&v1, &v2));
        assert_eq!(d1.as_deref(), Some(&3));
        assert_eq!(d2.as_deref(), Some(&3));
    }

    /// Invariant: `drop_unique_refs` spares views referenced elsewhere;
    /// `drop_all_refs` releases everything without invalidating outside
    /// owners.
    #[test]
    fn drop_unique_refs_is_selective() {
        let c: UniquelyKeyedResourceCache<u32, Mask> = UniquelyKeyedResourceCache::new();
        let held = c.add(1, Arc::new(Mask { radius: 1 }));
        drop(c.add(2, Arc::new(Mask { radius: 2 })));
        assert_eq!(c.len(), 2);

        c.drop_unique_refs();
        assert_eq!(c.len(), 1);
        assert!(c.find(&1).is_some());
        assert!(c.find(&2).is_none());

        c.drop_all_refs();
        assert!(c.is_empty());
        assert_eq!(held.radius, 1);
        assert_eq!(Arc::strong_count(&held), 1);
    }

    #[test]
    fn drop_unique_refs_older_than_respects_access_time() {
        let c: UniquelyKeyedResourceCache<u32, Mask> = UniquelyKeyedResourceCache::new();
        drop(c.add(1, Arc::new(Mask { radius: 1 })));
        std::thread::sleep(Duration::from_millis(5));
        let cutoff = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        drop(c.add(2, Arc::new(Mask { radius: 2 })));

        c.drop_unique_refs_older_than(cutoff);
        assert!(c.find(&1).is_none());
        assert!(c.find(&2).is_some());
    }

    /// Invariant: released views drop after the lock is released, so their
    /// destructors may use the cache.
    #[test]
    fn view_destructor_may_reenter_cache() {
        struct Reentrant {
            cache: *const UniquelyKeyedResourceCache<u32, Reentrant>,
        }
        impl Drop for Reentrant {
            fn drop(&mut self) {
                let c = unsafe { &*self.cache };
                let _ = c.find(&0);
            }
        }

        let c: UniquelyKeyedResourceCache<u32, Reentrant> = UniquelyKeyedResourceCache::new();
        c.add(1, Arc::new(Reentrant { cache: &c }));
        c.drop_all_refs();
        assert!(c.is_empty());
    }
}
