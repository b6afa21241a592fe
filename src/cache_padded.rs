//! Adapted from crossbeam-utils. Keeps each worker thread's active
//! timestamp on its own cache line so that publishing a new timestamp
//! doesn't invalidate its neighbours while the horizon is being scanned.
use std::fmt;
use std::ops::Deref;

// Sandy Bridge and later prefetch pairs of 64-byte lines, and the "big" cores
// of ARM big.LITTLE use 128 byte lines.
#[cfg_attr(
    any(target_arch = "x86_64", target_arch = "aarch64"),
    repr(align(128))
)]
#[cfg_attr(
    not(any(target_arch = "x86_64", target_arch = "aarch64")),
    repr(align(64))
)]
#[derive(Default)]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    /// Pads and aligns a value to the length of a cache line.
    pub const fn new(t: T) -> CachePadded<T> {
        CachePadded::<T> { value: t }
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for CachePadded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

#[test]
fn padded_slots_do_not_share_lines() {
    use std::sync::atomic::AtomicU64;

    let slots: Vec<CachePadded<AtomicU64>> =
        (0..2).map(|_| CachePadded::new(AtomicU64::new(0))).collect();
    let a = &*slots[0] as *const AtomicU64 as usize;
    let b = &*slots[1] as *const AtomicU64 as usize;
    assert!(b - a >= 64);
}
