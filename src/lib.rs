//! # `tidepool` - Pools, Queues and Probing Sets
//!
//! Low-level building blocks for allocation-heavy, multi-threaded code:
//! fixed-size object pools, a bounded lock-free queue and an open-addressing
//! hash multiset.
//!
//! ## Components
//!
//! 1. **Fixed-block pools** (`alloc`):
//!    - [`FixedBlockPool`]: single-threaded; slabs of uninitialized slots with an
//!      intrusive FIFO free list.
//!    - [`ConcurrentBlockPool`]: one owning handle allocates, any thread frees.
//!      Foreign frees go to a per-page atomic list and are absorbed by the owner
//!      lazily, so the owner's fast path touches no atomics.
//!
//! 2. **Bounded ring queue** (`concurrency`):
//!    - [`BoundedRingQueue`]: a power-of-two ring with one [`Producer`] and any
//!      number of [`Consumer`]s. Consumers claim items with a CAS on the read
//!      cursor; a full queue hands the pushed item back.
//!
//! 3. **Robin Hood set** (`collections`):
//!    - [`RobinHoodSet`]: linear probing where elements far from home take
//!      buckets from elements close to home, with backward-shift deletion.
//!
//! ## Memory Safety
//!
//! - Pools return raw `NonNull<T>` storage. Returning a pointer to the wrong
//!   pool, or twice, is undefined behavior, which is why the freeing methods
//!   are `unsafe fn`.
//! - Hot atomics live in [`CachePadded`] groups, away from fields the owning
//!   thread writes.
//! - Contention is resolved internally with CAS retry loops and
//!   `crossbeam_utils::Backoff`. Nothing blocks.
//!
//! ## Features
//!
//! - `tracing` (default): emits `tracing` events on slow paths such as page
//!   growth, allocation failure and rehashing.
//!
//! ## Example
//!
//! ```rust
//! use tidepool::{BlockAlloc, BoundedRingQueue, FixedBlockPool, RobinHoodSet};
//!
//! let mut pool = FixedBlockPool::<u64>::new();
//! let ptr = pool.alloc(7).unwrap();
//! assert_eq!(unsafe { *ptr.as_ptr() }, 7);
//! unsafe { pool.free(ptr) };
//!
//! let (mut producer, consumer) = BoundedRingQueue::with_capacity(4);
//! producer.push("job").unwrap();
//! assert_eq!(consumer.pop(), Some("job"));
//!
//! let mut set = RobinHoodSet::new();
//! set.insert("a");
//! set.insert("a");
//! assert_eq!(set.count("a"), 2);
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

#[macro_use]
mod trace;

pub mod alloc;
pub mod collections;
pub mod concurrency;
pub mod config;

pub use alloc::{
    AllocError,
    BlockAlloc,
    ConcurrentBlockPool,
    FixedBlockPool,
    GlobalPages,
    PageBacking,
    PageSource,
    SystemPages,
    POOL_PAGE_SIZE,
};
pub use collections::{Bucket, RobinHoodSet};
pub use concurrency::{BoundedRingQueue, CachePadded, Consumer, Producer};
pub use config::{ConcurrentPoolConfig, ConfigError, CoreConfig, FixedPoolConfig, RobinHoodConfig};

// Compile-time layout checks.
const _: () = {
    use core::mem;

    // Buckets are plain indices.
    assert!(mem::size_of::<Bucket>() == mem::size_of::<usize>());

    // Pool pages are large enough to hold the padded header plus some slots.
    assert!(POOL_PAGE_SIZE.is_power_of_two());
    assert!(POOL_PAGE_SIZE >= 16 * concurrency::cache_padded::CACHE_LINE);
};
