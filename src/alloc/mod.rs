//! Slab pools for fixed-size objects.
//!
//! - [`FixedBlockPool`]: single-threaded, slabs chained through their headers.
//! - [`ConcurrentBlockPool`]: one owning handle allocates; any thread frees.
//!
//! Both hand out uninitialized storage through [`BlockAlloc`].

pub mod allocator;
pub mod concurrent_pool;
pub mod fixed_pool;
pub mod page;
pub mod syscall;

pub use allocator::{AllocError, BlockAlloc};
pub use concurrent_pool::ConcurrentBlockPool;
pub use fixed_pool::FixedBlockPool;
pub use page::{GlobalPages, PageBacking, PageSource, SystemPages, POOL_PAGE_SIZE};
