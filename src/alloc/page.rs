//! Page sources: where the concurrent pool gets its aligned 64 KiB pages.
//!
//! [`GlobalPages`] goes through the Rust global allocator, [`SystemPages`]
//! maps regions from the OS directly. [`PageBacking`] picks one at runtime.

use core::alloc::Layout;
use std::alloc::{alloc, dealloc};

use serde::{Deserialize, Serialize};

use crate::alloc::syscall::{allocate_aligned_region, allocation_granularity, free_region};

/// Size and alignment of every [`ConcurrentBlockPool`](crate::alloc::ConcurrentBlockPool)
/// page: 64 KiB, the Windows virtual allocation granularity.
///
/// Pages are aligned to their size so a page header can be recovered from any
/// interior pointer by masking.
pub const POOL_PAGE_SIZE: usize = 64 * 1024;

/// Rounds `value` up to a multiple of `align` (a power of two, or zero for no-op).
pub const fn align_up(value: usize, align: usize) -> usize {
    if align == 0 {
        value
    } else {
        (value + (align - 1)) & !(align - 1)
    }
}

/// A source of large, aligned blocks of memory for pool pages.
///
/// This allows the pools to be backed either by the global Rust allocator or by
/// direct virtual memory calls.
pub trait PageSource {
    /// Allocates a block of `layout.size()` bytes aligned to `layout.align()`.
    ///
    /// Returns null on failure.
    ///
    /// # Safety
    /// `layout` must have a non-zero size.
    unsafe fn alloc_page(&self, layout: Layout) -> *mut u8;

    /// Releases a block.
    ///
    /// # Safety
    /// `ptr` must come from `alloc_page` on this source with the same `layout`.
    unsafe fn dealloc_page(&self, ptr: *mut u8, layout: Layout);
}

/// Pages from the global Rust allocator.
#[derive(Default, Clone, Copy, Debug)]
pub struct GlobalPages;

impl PageSource for GlobalPages {
    unsafe fn alloc_page(&self, layout: Layout) -> *mut u8 {
        alloc(layout)
    }

    unsafe fn dealloc_page(&self, ptr: *mut u8, layout: Layout) {
        dealloc(ptr, layout);
    }
}

/// Pages mapped straight from the OS (`mmap` / `VirtualAlloc`).
///
/// Every region is rounded out to the OS allocation granularity in both size
/// and alignment, so smaller layouts never share a mapping.
#[derive(Default, Clone, Copy, Debug)]
pub struct SystemPages;

impl SystemPages {
    /// Size and alignment of the region actually mapped for `layout`.
    pub fn region_for(layout: Layout) -> (usize, usize) {
        let granularity = allocation_granularity();
        (
            align_up(layout.size(), granularity),
            layout.align().max(granularity),
        )
    }
}

impl PageSource for SystemPages {
    unsafe fn alloc_page(&self, layout: Layout) -> *mut u8 {
        let (size, align) = Self::region_for(layout);
        allocate_aligned_region(size, align).unwrap_or(core::ptr::null_mut())
    }

    unsafe fn dealloc_page(&self, ptr: *mut u8, layout: Layout) {
        free_region(ptr, Self::region_for(layout).0);
    }
}

/// Runtime choice of page source, as read from configuration.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageBacking {
    /// [`GlobalPages`].
    #[default]
    Global,
    /// [`SystemPages`].
    System,
}

impl PageSource for PageBacking {
    unsafe fn alloc_page(&self, layout: Layout) -> *mut u8 {
        match self {
            PageBacking::Global => GlobalPages.alloc_page(layout),
            PageBacking::System => SystemPages.alloc_page(layout),
        }
    }

    unsafe fn dealloc_page(&self, ptr: *mut u8, layout: Layout) {
        match self {
            PageBacking::Global => GlobalPages.dealloc_page(ptr, layout),
            PageBacking::System => SystemPages.dealloc_page(ptr, layout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(source: &impl PageSource) {
        let layout = Layout::from_size_align(POOL_PAGE_SIZE, POOL_PAGE_SIZE).unwrap();
        unsafe {
            let ptr = source.alloc_page(layout);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize & (POOL_PAGE_SIZE - 1), 0);
            ptr.add(POOL_PAGE_SIZE - 1).write(7);
            source.dealloc_page(ptr, layout);
        }
    }

    #[test]
    fn sources_return_aligned_pages() {
        round_trip(&GlobalPages);
        round_trip(&SystemPages);
        round_trip(&PageBacking::System);
    }

    #[test]
    fn system_pages_round_to_allocation_granularity() {
        let granularity = allocation_granularity();
        assert_eq!(POOL_PAGE_SIZE % granularity, 0);
        assert_eq!(
            SystemPages::region_for(Layout::from_size_align(POOL_PAGE_SIZE, POOL_PAGE_SIZE).unwrap()),
            (POOL_PAGE_SIZE, POOL_PAGE_SIZE)
        );

        let small = Layout::from_size_align(100, 8).unwrap();
        assert_eq!(SystemPages::region_for(small), (granularity, granularity));
        unsafe {
            let ptr = SystemPages.alloc_page(small);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % granularity, 0);
            // The whole rounded region is mapped.
            ptr.add(granularity - 1).write(3);
            SystemPages.dealloc_page(ptr, small);
        }
    }

    #[test]
    fn align_up_rounds() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(32, 16), 32);
        assert_eq!(align_up(5, 0), 5);
    }
}
