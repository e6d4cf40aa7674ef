//! The allocation seam shared by both pools: [`BlockAlloc`] and [`AllocError`].

use core::ptr::NonNull;

/// A pool handing out uninitialized storage for values of type `T`.
///
/// Implementors never construct or drop values: the caller writes into the
/// returned pointer and drops the value in place before handing the storage
/// back. Both [`FixedBlockPool`](crate::alloc::FixedBlockPool) and
/// [`ConcurrentBlockPool`](crate::alloc::ConcurrentBlockPool) implement this.
pub trait BlockAlloc<T> {
    /// Allocates storage for one `T`.
    ///
    /// # Errors
    /// Returns `AllocError` if the pool had to grow and could not.
    fn allocate(&mut self) -> Result<NonNull<T>, AllocError>;

    /// Returns storage to the pool.
    ///
    /// # Safety
    /// `ptr` must have been returned by `allocate` on a pool of the same kind that
    /// is still alive, and must not have been deallocated since. Any value
    /// written into it must already have been dropped or moved out.
    unsafe fn deallocate(&mut self, ptr: NonNull<T>);

    /// Allocates storage and moves `value` into it.
    ///
    /// # Errors
    /// Returns `AllocError` (and drops `value`) if allocation fails.
    #[inline]
    fn alloc(&mut self, value: T) -> Result<NonNull<T>, AllocError> {
        let ptr = self.allocate()?;
        // SAFETY: fresh storage, sized and aligned for `T`.
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Drops the value behind `ptr` and returns its storage to the pool.
    ///
    /// # Safety
    /// Same as [`deallocate`](Self::deallocate), and `ptr` must hold an
    /// initialized `T`.
    #[inline]
    unsafe fn free(&mut self, ptr: NonNull<T>) {
        core::ptr::drop_in_place(ptr.as_ptr());
        self.deallocate(ptr);
    }
}

/// The error type for allocation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The backing allocator returned null for a slab or page.
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },
    /// The pool reached its configured page limit.
    PageLimit {
        /// The configured limit.
        limit: usize,
    },
    /// A single element does not fit in one page.
    ElementTooLarge {
        /// Element size in bytes.
        size: usize,
        /// Element alignment in bytes.
        align: usize,
        /// Page size in bytes.
        page_size: usize,
    },
}

impl core::fmt::Display for AllocError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            AllocError::OutOfMemory { size, align } => {
                write!(f, "memory allocation of {size} bytes (align {align}) failed")
            }
            AllocError::PageLimit { limit } => {
                write!(f, "pool page limit of {limit} pages reached")
            }
            AllocError::ElementTooLarge { size, align, page_size } => write!(
                f,
                "element of {size} bytes (align {align}) does not fit in a {page_size} byte page"
            ),
        }
    }
}

impl std::error::Error for AllocError {}
