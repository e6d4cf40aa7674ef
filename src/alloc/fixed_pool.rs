//! `FixedBlockPool`: a single-threaded slab pool for one element type.
//!
//! Memory is carved from slabs of `slab_len` slots. Each slab starts with a
//! pointer to the slab allocated before it, so drop can walk the chain without
//! any side table. Free slots are threaded into an intrusive singly linked list
//! through their own storage; the tail is tracked so returned slots (and whole
//! batches of them) are appended in O(1).
//!
//! There is no synchronization and no validation of returned pointers.

use core::alloc::Layout;
use core::marker::PhantomData;
use core::mem;
use core::ptr::{self, NonNull};
use std::alloc::{alloc, dealloc};

use crate::alloc::{AllocError, BlockAlloc};
use crate::config::{ConfigError, FixedPoolConfig, DEFAULT_SLAB_LEN};

/// Free-list link written into the storage of an unused slot.
struct FreeItem {
    next: *mut FreeItem,
}

/// Header at the start of every slab.
struct SlabHeader {
    prev: *mut SlabHeader,
}

/// A single-threaded slab pool handing out storage for `T`.
pub struct FixedBlockPool<T> {
    free_head: *mut FreeItem,
    free_tail: *mut FreeItem,
    last_slab: *mut SlabHeader,
    slab_layout: Layout,
    slots_offset: usize,
    slot_size: usize,
    slab_len: usize,
    slab_count: usize,
    live: usize,
    _marker: PhantomData<T>,
}

// SAFETY: the pool owns its slabs outright; moving it moves that ownership.
unsafe impl<T: Send> Send for FixedBlockPool<T> {}

impl<T> FixedBlockPool<T> {
    /// Creates an empty pool with the default slab length. No memory is
    /// allocated until the first `allocate`.
    pub fn new() -> Self {
        Self::with_slab_len(DEFAULT_SLAB_LEN)
    }

    /// Creates an empty pool whose slabs hold `slab_len` elements each.
    ///
    /// # Panics
    /// Panics if `slab_len` is zero or the slab size overflows `isize`.
    pub fn with_slab_len(slab_len: usize) -> Self {
        assert!(slab_len != 0, "slab length must be non-zero");
        match Self::layouts(slab_len) {
            Some((slab_layout, slots_offset, slot_size)) => Self {
                free_head: ptr::null_mut(),
                free_tail: ptr::null_mut(),
                last_slab: ptr::null_mut(),
                slab_layout,
                slots_offset,
                slot_size,
                slab_len,
                slab_count: 0,
                live: 0,
                _marker: PhantomData,
            },
            None => panic!("slab of {slab_len} elements overflows the address space"),
        }
    }

    /// Creates a pool from configuration.
    ///
    /// # Errors
    /// Rejects a zero or oversized slab length.
    pub fn from_config(config: &FixedPoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if Self::layouts(config.slab_len).is_none() {
            return Err(ConfigError::InvalidSlabLen(config.slab_len));
        }
        Ok(Self::with_slab_len(config.slab_len))
    }

    /// Slab layout, offset of the first slot and the slot stride.
    fn layouts(slab_len: usize) -> Option<(Layout, usize, usize)> {
        let slot = Layout::from_size_align(
            mem::size_of::<T>().max(mem::size_of::<FreeItem>()),
            mem::align_of::<T>().max(mem::align_of::<FreeItem>()),
        )
        .ok()?
        .pad_to_align();
        let slots = Layout::from_size_align(slot.size().checked_mul(slab_len)?, slot.align()).ok()?;
        let (slab, offset) = Layout::new::<SlabHeader>().extend(slots).ok()?;
        Some((slab.pad_to_align(), offset, slot.size()))
    }

    /// Number of elements currently handed out.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if nothing is handed out.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slabs allocated so far.
    #[inline]
    pub fn slab_count(&self) -> usize {
        self.slab_count
    }

    /// Elements per slab.
    #[inline]
    pub fn slab_len(&self) -> usize {
        self.slab_len
    }

    /// Total slots across all slabs.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slab_count * self.slab_len
    }

    /// Allocates a fresh slab, threads all but its last slot onto the (empty)
    /// free list and returns the last slot.
    #[cold]
    fn grow(&mut self) -> Result<NonNull<T>, AllocError> {
        debug_assert!(self.free_head.is_null());

        // SAFETY: the slab layout always has a non-zero size (it holds a header).
        let raw = unsafe { alloc(self.slab_layout) };
        if raw.is_null() {
            warn_event!(size = self.slab_layout.size(), "fixed pool slab allocation failed");
            return Err(AllocError::OutOfMemory {
                size: self.slab_layout.size(),
                align: self.slab_layout.align(),
            });
        }

        unsafe {
            let header = raw.cast::<SlabHeader>();
            header.write(SlabHeader { prev: self.last_slab });
            self.last_slab = header;

            let base = raw.add(self.slots_offset);
            let stride = self.slot_size;
            let slot = |i: usize| base.add(i * stride).cast::<FreeItem>();
            let linked = self.slab_len - 1;
            if linked > 0 {
                for i in 0..linked - 1 {
                    slot(i).write(FreeItem { next: slot(i + 1) });
                }
                slot(linked - 1).write(FreeItem { next: ptr::null_mut() });
                self.free_head = slot(0);
                self.free_tail = slot(linked - 1);
            }

            self.slab_count += 1;
            self.live += 1;
            trace_event!(slabs = self.slab_count, slab_len = self.slab_len, "fixed pool grew");
            Ok(NonNull::new_unchecked(slot(linked).cast::<T>()))
        }
    }

    /// Returns a batch of slots with a single splice onto the free list tail.
    ///
    /// # Safety
    /// Every pointer must satisfy the contract of [`BlockAlloc::deallocate`],
    /// and no pointer may appear twice.
    pub unsafe fn deallocate_all<I>(&mut self, ptrs: I)
    where
        I: IntoIterator<Item = NonNull<T>>,
    {
        let mut head: *mut FreeItem = ptr::null_mut();
        let mut tail: *mut FreeItem = ptr::null_mut();
        let mut count = 0;
        for p in ptrs {
            let item = p.as_ptr().cast::<FreeItem>();
            item.write(FreeItem { next: ptr::null_mut() });
            if tail.is_null() {
                head = item;
            } else {
                (*tail).next = item;
            }
            tail = item;
            count += 1;
        }
        if head.is_null() {
            return;
        }
        self.append(head, tail);
        self.live -= count;
    }

    #[inline]
    unsafe fn append(&mut self, head: *mut FreeItem, tail: *mut FreeItem) {
        if self.free_tail.is_null() {
            self.free_head = head;
        } else {
            (*self.free_tail).next = head;
        }
        self.free_tail = tail;
    }
}

impl<T> BlockAlloc<T> for FixedBlockPool<T> {
    #[inline]
    fn allocate(&mut self) -> Result<NonNull<T>, AllocError> {
        match NonNull::new(self.free_head) {
            Some(item) => unsafe {
                self.free_head = (*item.as_ptr()).next;
                if self.free_head.is_null() {
                    self.free_tail = ptr::null_mut();
                }
                self.live += 1;
                Ok(item.cast())
            },
            None => self.grow(),
        }
    }

    #[inline]
    unsafe fn deallocate(&mut self, ptr: NonNull<T>) {
        let item = ptr.as_ptr().cast::<FreeItem>();
        item.write(FreeItem { next: ptr::null_mut() });
        self.append(item, item);
        self.live -= 1;
    }
}

impl<T> Default for FixedBlockPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> core::fmt::Debug for FixedBlockPool<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FixedBlockPool")
            .field("len", &self.live)
            .field("slab_len", &self.slab_len)
            .field("slab_count", &self.slab_count)
            .finish()
    }
}

impl<T> Drop for FixedBlockPool<T> {
    fn drop(&mut self) {
        let mut slab = self.last_slab;
        while !slab.is_null() {
            unsafe {
                let prev = (*slab).prev;
                dealloc(slab.cast::<u8>(), self.slab_layout);
                slab = prev;
            }
        }
        trace_event!(slabs = self.slab_count, outstanding = self.live, "fixed pool dropped");
    }
}
