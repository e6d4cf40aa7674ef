//! A lock-free, bounded, single-producer multi-consumer ring queue.
//!
//! Two monotonically increasing counters index a power-of-two ring:
//! `write_pos` is advanced only by the producer and published with a release
//! store; `read_pos` is advanced by consumers with a CAS, so each item is claimed
//! by exactly one of them.
//!
//! Each slot also carries a stamp: the position it may next be written at. A
//! consumer bumps it by one lap after moving the value out, which is what keeps
//! the producer from lapping a slot that is still being read. A full queue hands
//! the item back instead of overwriting it.
//!
//! `pop` on an apparently empty queue fails immediately. Under a concurrent
//! push a consumer may see "empty" while an item is in flight; callers that need
//! the item simply try again later.

use core::fmt;
use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::Ordering;

use crossbeam_utils::Backoff;

use crate::concurrency::loom::{spin, Arc, AtomicUsize, UnsafeCell};
use crate::concurrency::CachePadded;

struct Slot<T> {
    /// Position at which the producer may next write this slot.
    stamp: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Shared state behind a [`Producer`] and its [`Consumer`]s.
pub struct BoundedRingQueue<T> {
    write_pos: CachePadded<AtomicUsize>,
    read_pos: CachePadded<AtomicUsize>,
    slots: Box<[Slot<T>]>,
    mask: usize,
}

// SAFETY: a slot's value is written only by the unique producer while no
// consumer can claim it, and read only by the consumer whose CAS claimed it.
unsafe impl<T: Send> Send for BoundedRingQueue<T> {}
unsafe impl<T: Send> Sync for BoundedRingQueue<T> {}

impl<T> BoundedRingQueue<T> {
    /// Creates a queue holding up to `capacity` items and returns its producer
    /// and a first consumer. Clone the consumer for more.
    ///
    /// # Panics
    /// Panics if `capacity` is not a power of two.
    pub fn with_capacity(capacity: usize) -> (Producer<T>, Consumer<T>) {
        assert!(
            capacity.is_power_of_two(),
            "ring queue capacity must be a power of two, got {capacity}"
        );
        let slots = (0..capacity)
            .map(|i| Slot {
                stamp: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        let queue = Arc::new(Self {
            write_pos: CachePadded::new(AtomicUsize::new(0)),
            read_pos: CachePadded::new(AtomicUsize::new(0)),
            slots,
            mask: capacity - 1,
        });
        (
            Producer { queue: queue.clone() },
            Consumer { queue },
        )
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Items pushed and not yet claimed. Only a snapshot under concurrency.
    pub fn len(&self) -> usize {
        let read = self.read_pos.load(Ordering::Acquire);
        let write = self.write_pos.load(Ordering::Acquire);
        write.wrapping_sub(read).min(self.capacity())
    }

    /// Returns `true` if no item was observed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Producer side. Callers guarantee uniqueness through `&mut Producer`.
    fn push(&self, item: T) -> Result<(), T> {
        let pos = self.write_pos.load(Ordering::Relaxed);
        let slot = &self.slots[pos & self.mask];
        if slot.stamp.load(Ordering::Acquire) != pos {
            return Err(item);
        }
        slot.value.with_mut(|p| unsafe { (*p).write(item) });
        self.write_pos.store(pos.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    fn pop(&self) -> Option<T> {
        let backoff = Backoff::new();
        loop {
            // Acquire so that a position claimed by an earlier consumer is never
            // ahead of the `write_pos` we observe next.
            let read = self.read_pos.load(Ordering::Acquire);
            let write = self.write_pos.load(Ordering::Acquire);
            if read == write {
                return None;
            }
            debug_assert!(write.wrapping_sub(read) <= self.capacity());

            match self.read_pos.compare_exchange_weak(
                read,
                read.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let slot = &self.slots[read & self.mask];
                    let value = slot.value.with(|p| unsafe { ptr::read(p).assume_init() });
                    slot.stamp
                        .store(read.wrapping_add(self.capacity()), Ordering::Release);
                    return Some(value);
                }
                Err(_) => spin(&backoff),
            }
        }
    }
}

impl<T> Drop for BoundedRingQueue<T> {
    fn drop(&mut self) {
        let mut read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Relaxed);
        while read != write {
            self.slots[read & self.mask]
                .value
                .with_mut(|p| unsafe { ptr::drop_in_place((*p).as_mut_ptr()) });
            read = read.wrapping_add(1);
        }
    }
}

impl<T> fmt::Debug for BoundedRingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedRingQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

/// The unique pushing end of a [`BoundedRingQueue`].
pub struct Producer<T> {
    queue: Arc<BoundedRingQueue<T>>,
}

impl<T> Producer<T> {
    /// Publishes `item` to consumers.
    ///
    /// # Errors
    /// Hands `item` back if the queue is full, i.e. the slot it would land in
    /// has not been emptied by a consumer yet. Size the queue for the workload.
    #[inline]
    pub fn push(&mut self, item: T) -> Result<(), T> {
        self.queue.push(item)
    }

    /// Creates another consumer for this queue.
    pub fn consumer(&self) -> Consumer<T> {
        Consumer { queue: self.queue.clone() }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Snapshot of the number of unclaimed items.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if no item was observed.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Producer").field(&*self.queue).finish()
    }
}

/// A popping end of a [`BoundedRingQueue`]. Clone freely, share across threads.
pub struct Consumer<T> {
    queue: Arc<BoundedRingQueue<T>>,
}

impl<T> Consumer<T> {
    /// Claims the oldest unclaimed item, or returns `None` if the queue looked
    /// empty.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Snapshot of the number of unclaimed items.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if no item was observed.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<T> Clone for Consumer<T> {
    fn clone(&self) -> Self {
        Self { queue: self.queue.clone() }
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Consumer").field(&*self.queue).finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    #[test]
    fn test_empty_pop_fails() {
        let (_producer, consumer) = BoundedRingQueue::<u32>::with_capacity(4);
        assert_eq!(consumer.pop(), None);
        assert!(consumer.is_empty());
    }

    #[test]
    fn test_push_then_single_pop() {
        let (mut producer, consumer) = BoundedRingQueue::with_capacity(4);
        producer.push(7).unwrap();
        assert_eq!(consumer.len(), 1);
        assert_eq!(consumer.pop(), Some(7));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn test_full_queue_hands_item_back() {
        let (mut producer, consumer) = BoundedRingQueue::with_capacity(2);
        producer.push(1).unwrap();
        producer.push(2).unwrap();
        assert_eq!(producer.push(3), Err(3));
        assert_eq!(consumer.pop(), Some(1));
        producer.push(3).unwrap();
        assert_eq!(consumer.pop(), Some(2));
        assert_eq!(consumer.pop(), Some(3));
    }

    #[test]
    fn test_wraps_many_laps_in_order() {
        let (mut producer, consumer) = BoundedRingQueue::with_capacity(8);
        for lap in 0..100u32 {
            for i in 0..5 {
                producer.push(lap * 10 + i).unwrap();
            }
            for i in 0..5 {
                assert_eq!(consumer.pop(), Some(lap * 10 + i));
            }
        }
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_rejects_non_power_of_two() {
        let _ = BoundedRingQueue::<u8>::with_capacity(6);
    }

    #[test]
    fn test_drop_releases_unclaimed_items() {
        static DROPS: StdAtomicUsize = StdAtomicUsize::new(0);
        struct Counted;
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let (mut producer, consumer) = BoundedRingQueue::with_capacity(4);
        for _ in 0..3 {
            assert!(producer.push(Counted).is_ok());
        }
        drop(consumer.pop());
        drop(producer);
        drop(consumer);
        assert_eq!(DROPS.load(Ordering::Relaxed), 3);
    }
}

#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use loom::thread;

    #[test]
    fn two_consumers_split_items() {
        loom::model(|| {
            let (mut producer, consumer) = BoundedRingQueue::with_capacity(2);
            let other = consumer.clone();
            let handle = thread::spawn(move || other.pop());

            producer.push(1u32).unwrap();
            producer.push(2u32).unwrap();
            let mine = consumer.pop();
            let theirs = handle.join().unwrap();

            let mut seen: Vec<u32> = mine.into_iter().chain(theirs).collect();
            while let Some(v) = consumer.pop() {
                seen.push(v);
            }
            seen.sort_unstable();
            assert_eq!(seen, vec![1, 2]);
        });
    }

    #[test]
    fn producer_waits_for_slot_release() {
        loom::model(|| {
            let (mut producer, consumer) = BoundedRingQueue::with_capacity(1);
            producer.push(1u32).unwrap();
            let handle = thread::spawn(move || consumer.pop());
            // Either the consumer has released the slot or the push is refused.
            match producer.push(2) {
                Ok(()) => {
                    assert_eq!(handle.join().unwrap(), Some(1));
                }
                Err(2) => {
                    let _ = handle.join().unwrap();
                }
                Err(_) => unreachable!(),
            }
        });
    }
}
