//! `ConcurrentBlockPool`: a slab pool whose elements may be freed from any thread.
//!
//! Every page is carved from a [`POOL_PAGE_SIZE`]-aligned block and records the
//! pool that created it (its *home* pool). Only the home pool allocates from a
//! page. Frees take one of two paths:
//!
//! - **Local**: the freeing handle is the home pool. The slot is pushed onto the
//!   page's owner-only free list; no atomics unless the page had been retired as
//!   fully allocated, in which case one CAS takes it back.
//! - **Remote**: any other handle (or [`ConcurrentBlockPool::release`]). The slot
//!   is pushed onto the page's atomic `returned_free` list. If that push replaced
//!   the "fully allocated" sentinel, the whole page is also pushed onto the home
//!   pool's atomic `returned_pages` list so the owner finds it again.
//!
//! The owner never waits on another thread: it drains returned items with one
//! swap when a page runs dry and drains returned pages with one swap when its
//! page list runs dry.
//!
//! ```text
//!  page (64 KiB, aligned)
//!  ┌──────────────────────┬──────────────────────────────┬────────┬────────┬───
//!  │ local  (owner only)  │ remote (atomics, other cores) │ slot 0 │ slot 1 │ ...
//!  │ local_free, chain    │ owner, returned_free, next    │        │        │
//!  └──────────────────────┴──────────────────────────────┴────────┴────────┴───
//!         128 bytes                   128 bytes
//! ```

use core::alloc::Layout;
use core::marker::PhantomData;
use core::mem;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::Backoff;

use crate::alloc::page::{align_up, GlobalPages, PageBacking, PageSource, POOL_PAGE_SIZE};
use crate::alloc::{AllocError, BlockAlloc};
use crate::concurrency::CachePadded;
use crate::config::{ConcurrentPoolConfig, ConfigError};

const PAGE_LAYOUT: Layout = match Layout::from_size_align(POOL_PAGE_SIZE, POOL_PAGE_SIZE) {
    Ok(layout) => layout,
    Err(_) => panic!("invalid POOL_PAGE_SIZE"),
};

/// Free-list link written into the storage of an unused slot.
struct FreeItem {
    next: *mut FreeItem,
}

/// State of a pool that other threads touch. Boxed so its address is stable
/// for the lifetime of the pool; pages store that address as their owner.
struct PoolShared {
    returned_pages: CachePadded<AtomicPtr<PageHeader>>,
}

impl PoolShared {
    /// Pushes a page that just left the "fully allocated" state.
    unsafe fn push_returned_page(&self, page: *mut PageHeader) {
        let backoff = Backoff::new();
        let remote = &(*page).remote;
        let mut head = self.returned_pages.load(Ordering::Relaxed);
        loop {
            remote.next.store(head, Ordering::Relaxed);
            match self.returned_pages.compare_exchange_weak(
                head,
                page,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => {
                    head = actual;
                    backoff.spin();
                }
            }
        }
    }
}

/// Page fields only the home pool reads or writes.
struct PageLocal {
    local_free: *mut FreeItem,
    /// Every page of the pool, newest first, for drop.
    chain: *mut PageHeader,
}

/// Page fields shared with other threads.
struct PageRemote {
    /// Never changes after construction.
    owner: *const PoolShared,
    /// `0` = nothing returned, owner address = fully allocated, otherwise the
    /// head of a `FreeItem` list.
    returned_free: AtomicUsize,
    /// Link in either the owner's `free_pages` list or its `returned_pages`
    /// list; a page is on at most one of them.
    next: AtomicPtr<PageHeader>,
}

#[repr(C)]
struct PageHeader {
    local: CachePadded<PageLocal>,
    remote: CachePadded<PageRemote>,
}

const _: () = {
    assert!(mem::size_of::<CachePadded<PageLocal>>() == crate::concurrency::cache_padded::CACHE_LINE);
    assert!(mem::size_of::<PageHeader>() < POOL_PAGE_SIZE);
};

/// Recovers the header of the page containing `ptr`.
///
/// # Safety
/// `ptr` must point into a slot of a live pool page. Pages are
/// [`POOL_PAGE_SIZE`]-aligned and start with their header, so clearing the low
/// bits of any slot address yields the header; for any other pointer the result
/// is garbage.
#[inline]
unsafe fn page_of<T>(ptr: NonNull<T>) -> *mut PageHeader {
    ((ptr.as_ptr() as usize) & !(POOL_PAGE_SIZE - 1)) as *mut PageHeader
}

/// A slab pool for `T` with an owning handle and lock-free cross-thread frees.
///
/// `allocate` takes `&mut self`, so exactly one thread allocates from a pool at
/// a time. The handle is `Send` and may migrate between threads; it is not
/// `Sync`. Elements may be freed on any thread, either through that thread's own
/// pool handle ([`deallocate`](BlockAlloc::deallocate)) or without one
/// ([`release`](Self::release)).
///
/// Dropping the pool frees every page, whether or not all elements came back.
pub struct ConcurrentBlockPool<T, P: PageSource = GlobalPages> {
    free_pages: *mut PageHeader,
    all_pages: *mut PageHeader,
    page_count: usize,
    max_pages: Option<usize>,
    /// Leaked box, reclaimed in drop. Other threads reach it through page
    /// headers, so it is never accessed through a unique reference.
    shared: NonNull<PoolShared>,
    source: P,
    _marker: PhantomData<T>,
}

// SAFETY: pages are owned by the pool; the only state other threads touch is
// reached through atomics.
unsafe impl<T: Send, P: PageSource + Send> Send for ConcurrentBlockPool<T, P> {}

impl<T> ConcurrentBlockPool<T, GlobalPages> {
    /// Creates an empty pool backed by the global allocator.
    pub fn new() -> Self {
        Self::with_source(GlobalPages)
    }
}

impl<T> ConcurrentBlockPool<T, PageBacking> {
    /// Creates an empty pool from configuration.
    ///
    /// # Errors
    /// Rejects invalid configuration.
    pub fn from_config(config: &ConcurrentPoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut pool = Self::with_source(config.backing);
        pool.max_pages = config.max_pages;
        Ok(pool)
    }
}

impl<T> Default for ConcurrentBlockPool<T, GlobalPages> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, P: PageSource> ConcurrentBlockPool<T, P> {
    const SLOT_ALIGN: usize = if mem::align_of::<T>() > mem::align_of::<FreeItem>() {
        mem::align_of::<T>()
    } else {
        mem::align_of::<FreeItem>()
    };
    const SLOT_SIZE: usize = align_up(
        if mem::size_of::<T>() > mem::size_of::<FreeItem>() {
            mem::size_of::<T>()
        } else {
            mem::size_of::<FreeItem>()
        },
        Self::SLOT_ALIGN,
    );
    const SLOTS_OFFSET: usize = align_up(mem::size_of::<PageHeader>(), Self::SLOT_ALIGN);
    const SLOTS_PER_PAGE: usize = if Self::SLOTS_OFFSET >= POOL_PAGE_SIZE {
        0
    } else {
        (POOL_PAGE_SIZE - Self::SLOTS_OFFSET) / Self::SLOT_SIZE
    };

    /// Creates an empty pool drawing pages from `source`.
    pub fn with_source(source: P) -> Self {
        Self {
            free_pages: ptr::null_mut(),
            all_pages: ptr::null_mut(),
            page_count: 0,
            max_pages: None,
            shared: NonNull::from(Box::leak(Box::new(PoolShared {
                returned_pages: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            }))),
            source,
            _marker: PhantomData,
        }
    }

    /// Caps the number of pages this pool may own.
    #[must_use]
    pub fn with_page_limit(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Pages allocated so far.
    #[inline]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Elements carved out of each page (zero if `T` does not fit in a page).
    #[inline]
    pub const fn capacity_per_page() -> usize {
        Self::SLOTS_PER_PAGE
    }

    /// Total slots across all pages.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.page_count * Self::SLOTS_PER_PAGE
    }

    /// The value a page's `returned_free` holds while fully allocated.
    #[inline]
    fn sentinel(&self) -> usize {
        self.owner() as usize
    }

    #[inline]
    fn owner(&self) -> *const PoolShared {
        self.shared.as_ptr()
    }

    #[inline]
    fn shared(&self) -> &PoolShared {
        // SAFETY: allocated in the constructor, freed only in drop.
        unsafe { self.shared.as_ref() }
    }

    /// Returns an element to its home pool from any thread, without a pool
    /// handle of one's own.
    ///
    /// # Safety
    /// `ptr` must come from `allocate` on a [`ConcurrentBlockPool`] that is still
    /// alive, must not have been freed since, and must no longer hold a live
    /// value.
    pub unsafe fn release(ptr: NonNull<T>) {
        let page = page_of(ptr);
        let remote = &(*page).remote;
        let sentinel = remote.owner as usize;
        let item = ptr.as_ptr().cast::<FreeItem>();

        let backoff = Backoff::new();
        let mut current = remote.returned_free.load(Ordering::Relaxed);
        loop {
            let next = if current == sentinel {
                ptr::null_mut()
            } else {
                current as *mut FreeItem
            };
            item.write(FreeItem { next });
            match remote.returned_free.compare_exchange_weak(
                current,
                item as usize,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => {
                    current = actual;
                    backoff.spin();
                }
            }
        }

        // We took the page out of the fully allocated state, so we are the one
        // who hands it back to its owner.
        if current == sentinel {
            let owner = &*remote.owner;
            owner.push_returned_page(page);
        }
    }

    /// Local free: the page belongs to this pool.
    #[inline]
    unsafe fn deallocate_local(&mut self, page: *mut PageHeader, item: *mut FreeItem) {
        let local = &mut (*page).local;
        let was_dry = local.local_free.is_null();
        item.write(FreeItem { next: local.local_free });
        local.local_free = item;

        if was_dry {
            let remote = &(*page).remote;
            if remote
                .returned_free
                .compare_exchange(self.sentinel(), 0, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                remote.next.store(self.free_pages, Ordering::Relaxed);
                self.free_pages = page;
            }
        }
    }

    /// Carves a new page and pushes it onto `free_pages`.
    #[cold]
    fn grow(&mut self) -> Result<(), AllocError> {
        if Self::SLOTS_PER_PAGE == 0 {
            return Err(AllocError::ElementTooLarge {
                size: mem::size_of::<T>(),
                align: mem::align_of::<T>(),
                page_size: POOL_PAGE_SIZE,
            });
        }
        if let Some(limit) = self.max_pages {
            if self.page_count >= limit {
                warn_event!(limit, "concurrent pool page limit reached");
                return Err(AllocError::PageLimit { limit });
            }
        }

        // SAFETY: PAGE_LAYOUT has a non-zero size.
        let raw = unsafe { self.source.alloc_page(PAGE_LAYOUT) };
        if raw.is_null() {
            warn_event!(size = POOL_PAGE_SIZE, "concurrent pool page allocation failed");
            return Err(AllocError::OutOfMemory {
                size: POOL_PAGE_SIZE,
                align: POOL_PAGE_SIZE,
            });
        }
        debug_assert_eq!(raw as usize & (POOL_PAGE_SIZE - 1), 0);

        unsafe {
            let base = raw.add(Self::SLOTS_OFFSET);
            let slot = |i: usize| base.add(i * Self::SLOT_SIZE).cast::<FreeItem>();
            let n = Self::SLOTS_PER_PAGE;
            for i in 0..n - 1 {
                slot(i).write(FreeItem { next: slot(i + 1) });
            }
            slot(n - 1).write(FreeItem { next: ptr::null_mut() });

            let page = raw.cast::<PageHeader>();
            page.write(PageHeader {
                local: CachePadded::new(PageLocal {
                    local_free: slot(0),
                    chain: self.all_pages,
                }),
                remote: CachePadded::new(PageRemote {
                    owner: self.owner(),
                    returned_free: AtomicUsize::new(0),
                    next: AtomicPtr::new(self.free_pages),
                }),
            });
            self.all_pages = page;
            self.free_pages = page;
        }

        self.page_count += 1;
        debug_event!(
            pages = self.page_count,
            slots_per_page = Self::SLOTS_PER_PAGE,
            "concurrent pool grew"
        );
        Ok(())
    }
}

impl<T, P: PageSource> BlockAlloc<T> for ConcurrentBlockPool<T, P> {
    fn allocate(&mut self) -> Result<NonNull<T>, AllocError> {
        let sentinel = self.sentinel();
        loop {
            let page = self.free_pages;
            if page.is_null() {
                let returned = self.shared().returned_pages.swap(ptr::null_mut(), Ordering::Acquire);
                if returned.is_null() {
                    self.grow()?;
                } else {
                    self.free_pages = returned;
                }
                continue;
            }

            unsafe {
                let local = &mut (*page).local;
                if let Some(item) = NonNull::new(local.local_free) {
                    local.local_free = (*item.as_ptr()).next;
                    return Ok(item.cast());
                }

                let remote = &(*page).remote;
                let returned = remote.returned_free.swap(0, Ordering::Acquire);
                if returned != 0 {
                    debug_assert_ne!(returned, sentinel, "listed page marked fully allocated");
                    local.local_free = returned as *mut FreeItem;
                    continue;
                }

                // Read the link before publishing the sentinel: from then on a
                // remote free may reuse `next` to hand the page back.
                let next = remote.next.load(Ordering::Relaxed);
                if remote
                    .returned_free
                    .compare_exchange(0, sentinel, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    self.free_pages = next;
                }
                // Otherwise an item arrived in between; the next round absorbs it.
            }
        }
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<T>) {
        let page = page_of(ptr);
        let remote = &(*page).remote;
        if remote.owner == self.owner() {
            self.deallocate_local(page, ptr.as_ptr().cast());
        } else {
            Self::release(ptr);
        }
    }
}

impl<T, P: PageSource> core::fmt::Debug for ConcurrentBlockPool<T, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConcurrentBlockPool")
            .field("page_count", &self.page_count)
            .field("slots_per_page", &Self::SLOTS_PER_PAGE)
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

impl<T, P: PageSource> Drop for ConcurrentBlockPool<T, P> {
    fn drop(&mut self) {
        let mut page = self.all_pages;
        while !page.is_null() {
            unsafe {
                let local = &(*page).local;
                let next = local.chain;
                self.source.dealloc_page(page.cast(), PAGE_LAYOUT);
                page = next;
            }
        }
        // SAFETY: pages referring to it were just released.
        unsafe { drop(Box::from_raw(self.shared.as_ptr())) };
        trace_event!(pages = self.page_count, "concurrent pool dropped");
    }
}
