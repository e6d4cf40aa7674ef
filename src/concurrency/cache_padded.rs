//! Cache-line padding to keep independently written fields apart.

use std::ops::{Deref, DerefMut};

/// Aligns and pads `T` to its own cache line.
///
/// 128 bytes covers adjacent-line prefetching on x86 and the 128-byte lines of
/// Apple Silicon. Fields touched only by an owning thread and atomics touched by
/// other threads go in separate `CachePadded` groups.
#[repr(C, align(128))]
#[derive(Default)]
pub struct CachePadded<T> {
    value: T,
}

/// Size of one padded group.
pub const CACHE_LINE: usize = 128;

impl<T> CachePadded<T> {
    /// Wraps `value`.
    pub const fn new(value: T) -> Self {
        Self { value }
    }

    /// Unwraps the value.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for CachePadded<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("CachePadded").field(&self.value).finish()
    }
}

const _: () = {
    assert!(core::mem::align_of::<CachePadded<u8>>() == CACHE_LINE);
    assert!(core::mem::size_of::<CachePadded<u64>>() == CACHE_LINE);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_values_land_on_separate_lines() {
        let pair = [CachePadded::new(1u64), CachePadded::new(2u64)];
        let a = &*pair[0] as *const u64 as usize;
        let b = &*pair[1] as *const u64 as usize;
        assert!(b - a >= CACHE_LINE);
        assert_eq!(*pair[1], 2);
        assert_eq!(pair.into_iter().map(CachePadded::into_inner).sum::<u64>(), 3);
    }
}
