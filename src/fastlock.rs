use std::{
    cell::UnsafeCell,
    fmt,
    ops::{Deref, DerefMut},
    sync::atomic::{
        AtomicBool,
        Ordering::{Acquire, Relaxed, Release},
    },
};

use crate::Backoff;

/// A test-and-test-and-set spin mutex. Critical sections guarded by it are
/// expected to be short and to never block.
pub struct FastLock<T> {
    lock: AtomicBool,
    inner: UnsafeCell<T>,
}

#[allow(unsafe_code)]
unsafe impl<T: Send> Send for FastLock<T> {}

#[allow(unsafe_code)]
unsafe impl<T: Send> Sync for FastLock<T> {}

pub struct FastLockGuard<'a, T> {
    mu: &'a FastLock<T>,
}

impl<T> Drop for FastLockGuard<'_, T> {
    fn drop(&mut self) {
        assert!(self.mu.lock.swap(false, Release));
    }
}

impl<T> Deref for FastLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        #[allow(unsafe_code)]
        unsafe {
            &*self.mu.inner.get()
        }
    }
}

impl<T> DerefMut for FastLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        #[allow(unsafe_code)]
        unsafe {
            &mut *self.mu.inner.get()
        }
    }
}

impl<T> FastLock<T> {
    pub const fn new(inner: T) -> FastLock<T> {
        FastLock { lock: AtomicBool::new(false), inner: UnsafeCell::new(inner) }
    }

    pub fn try_lock(&self) -> Option<FastLockGuard<'_, T>> {
        let success = self
            .lock
            .compare_exchange(false, true, Acquire, Relaxed)
            .is_ok();

        if success { Some(FastLockGuard { mu: self }) } else { None }
    }

    /// Spins with exponential backoff until the lock is acquired.
    pub fn lock(&self) -> FastLockGuard<'_, T> {
        let backoff = Backoff::new();
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            // wait for the flag to look free before retrying the CAS so that
            // waiters don't bounce the cache line around
            while self.lock.load(Relaxed) {
                backoff.spin();
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for FastLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => {
                f.debug_struct("FastLock").field("inner", &*guard).finish()
            }
            None => f.write_str("FastLock { <locked> }"),
        }
    }
}
