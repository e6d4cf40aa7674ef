//! Lock-free building blocks shared between threads.
//!
//! - [`CachePadded`]: isolates hot atomics on their own cache line.
//! - [`BoundedRingQueue`]: single-producer, multi-consumer bounded queue.

pub mod cache_padded;
pub(crate) mod loom;
pub mod ring_queue;

pub use cache_padded::CachePadded;
pub use ring_queue::{BoundedRingQueue, Consumer, Producer};
