//! dedup-cache: concurrent content-addressed caches that map GPU-bound
//! content to stable handles, so identical GPU work is created, compiled
//! or uploaded once.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: decide whether new GPU work is needed and hand back a durable
//!   handle. Nothing here talks to a GPU.
//! - Layers:
//!   - Spinlock / SpinMutex<T>: test-and-set lock with backoff for the
//!     short critical sections below.
//!   - ChunkedArena<T>: append-only storage whose elements never move.
//!   - GenericBlockCache<T, S>: single-owner, content-addressed; returns a
//!     sequential `Index` per distinct block. Instantiated for uniform and
//!     texture data blocks. SharedBlockCache wraps it in a SpinMutex.
//!   - KeyedEntryDictionary<D>: self-locking map from serialized shader
//!     keys to arena-allocated `Entry` records with a `UniqueId`.
//!   - UniquelyKeyedResourceCache<K, V, D>: self-locking map from explicit
//!     keys to `Arc` views; the first `add` for a key wins.
//!   - Context / Recorder: explicit owners that inject the shared caches
//!     into each recorder. There is no global instance.
//!
//! Handles
//! - `Index` and `UniqueId` are 32-bit, issued from 1 in insertion order,
//!   never reused. `0` is the sentinel. Running out of handles is reported
//!   as `InsertError::HandleSpaceExhausted`, never by wrapping.
//!
//! Stability
//! - Blocks and dictionary entries are immutable once stored and live in
//!   a `ChunkedArena`, so references returned by `lookup` stay valid for
//!   the cache's lifetime, including across later inserts from other
//!   threads.
//! - Each stored item keeps its precomputed `u64` hash; indexing never
//!   re-invokes `Hash` on stored items.
//!
//! Locking
//! - Block and resource caches use the spinlock; the dictionary uses a
//!   `parking_lot::Mutex`. Every guarded section is one hash probe plus an
//!   optional append. Resource views released by bulk invalidation drop
//!   after the lock is released.
//! - Debug builds guard probes of single-owner structures against
//!   reentrancy from user `Hash`/`Eq`.
//!
//! Validation
//! - Every cache exposes `validate()`, which panics on any inconsistency
//!   between its hash index and its storage. Debug builds run it after each
//!   mutation; release builds rely on the invariants holding by
//!   construction.
//!
//! Notes and non-goals
//! - No eviction under memory pressure; only explicit removal and bulk
//!   invalidation on the resource cache.
//! - No persistence and no cross-process sharing.

mod arena;
pub mod block_cache;
mod block_cache_proptest;
pub mod blocks;
pub mod context;
pub mod dictionary;
mod error;
pub mod handle;
mod keyed_table;
mod reentrancy;
pub mod resource_cache;
pub mod shared_block_cache;
pub mod spinlock;

// Public surface
pub use arena::DEFAULT_CHUNK_SIZE;
pub use block_cache::GenericBlockCache;
pub use blocks::{
    SharedTextureDataCache, SharedUniformDataCache, TextureDataBlock, TextureDataCache, TextureId,
    UniformDataBlock, UniformDataCache,
};
pub use context::{BlendInfo, BlendMode, Context, ContextOptions, Recorder, ResourceHandle};
pub use dictionary::{DictionaryOptions, Entry, KeyedEntryDictionary, RuntimeEffectKey};
pub use error::InsertError;
pub use handle::{Index, UniqueId};
pub use resource_cache::UniquelyKeyedResourceCache;
pub use shared_block_cache::SharedBlockCache;
pub use spinlock::{SpinMutex, Spinlock};
