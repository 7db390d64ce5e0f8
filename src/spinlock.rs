//! Spinlock: a test-and-set lock for very short critical sections.
//!
//! `acquire` makes one optimistic swap; under contention it falls back to a
//! read-only wait loop with capped exponential `spin_loop` backoff before
//! retrying the swap. Waiting is unbounded and unfair. The lock must never
//! be held across a blocking call, and re-acquiring it on the same thread
//! deadlocks (not detected).
//!
//! `SpinMutex<T>` pairs the lock with the data it guards.

use core::cell::UnsafeCell;
use core::fmt;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

const MAX_BACKOFF_SHIFT: u32 = 6;

#[derive(Default)]
pub struct Spinlock {
    locked: AtomicBool,
}

impl Spinlock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn acquire(&self) {
        if !self.locked.swap(true, Ordering::Acquire) {
            return;
        }
        self.contended_acquire();
    }

    #[cold]
    fn contended_acquire(&self) {
        let mut shift = 0;
        loop {
            // Wait on a plain load so contending threads don't bounce the
            // cache line with writes.
            while self.locked.load(Ordering::Relaxed) {
                for _ in 0..(1u32 << shift) {
                    spin_loop();
                }
                if shift < MAX_BACKOFF_SHIFT {
                    shift += 1;
                }
            }
            if !self.locked.swap(true, Ordering::Acquire) {
                return;
            }
        }
    }

    /// Single non-blocking attempt. Returns true if the lock was taken.
    #[inline]
    pub fn try_acquire(&self) -> bool {
        !self.locked.swap(true, Ordering::Acquire)
    }

    #[inline]
    pub fn release(&self) {
        debug_assert!(
            self.locked.load(Ordering::Relaxed),
            "release of an unlocked Spinlock"
        );
        self.locked.store(false, Ordering::Release);
    }

    /// Acquire and return a guard that releases on drop.
    #[inline]
    pub fn lock(&self) -> SpinlockGuard<'_> {
        self.acquire();
        SpinlockGuard { lock: self }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Spinlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spinlock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// RAII guard returned by `Spinlock::lock`.
pub struct SpinlockGuard<'a> {
    lock: &'a Spinlock,
}

impl Drop for SpinlockGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Data guarded by a `Spinlock`.
pub struct SpinMutex<T: ?Sized> {
    lock: Spinlock,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `lock`; only `T: Send` is
// needed because the guard hands out `&mut T` to one thread at a time.
unsafe impl<T: ?Sized + Send> Send for SpinMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            lock: Spinlock::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinMutex<T> {
    #[inline]
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        self.lock.acquire();
        SpinMutexGuard { owner: self }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<SpinMutexGuard<'_, T>> {
        if self.lock.try_acquire() {
            Some(SpinMutexGuard { owner: self })
        } else {
            None
        }
    }

    /// Exclusive access without locking; `&mut self` proves no guard exists.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for SpinMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for SpinMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinMutex")
            .field("locked", &self.lock.is_locked())
            .finish_non_exhaustive()
    }
}

pub struct SpinMutexGuard<'a, T: ?Sized> {
    owner: &'a SpinMutex<T>,
}

impl<T: ?Sized> Deref for SpinMutexGuard<'_, T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.owner.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinMutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock exclusively.
        unsafe { &mut *self.owner.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinMutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.owner.lock.release();
    }
}
