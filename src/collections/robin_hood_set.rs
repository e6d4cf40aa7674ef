//! `RobinHoodSet`: an open-addressing hash multiset with Robin Hood probing.
//!
//! Every occupied node records how far its element sits from the bucket its
//! hash selects. On insert, an element that has travelled further takes the
//! bucket from one that has travelled less, which keeps probe sequences short
//! and lets lookups stop at the first node closer to home than the probe.
//! Removal shifts the following run back by one instead of leaving tombstones.
//!
//! Duplicates are kept: inserting an equal element twice stores two entries.

use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::iter::FusedIterator;
use core::mem::{self, MaybeUninit};
use std::collections::hash_map::RandomState;

use crate::config::{ConfigError, RobinHoodConfig, DEFAULT_LOAD_FACTOR};

/// Capacity of the first allocated table.
const MIN_CAPACITY: usize = 8;

struct Node<T> {
    /// Probe steps from the ideal bucket plus one; zero marks an empty node.
    dist: usize,
    value: MaybeUninit<T>,
}

impl<T> Node<T> {
    #[inline(always)]
    const fn empty() -> Self {
        Self {
            dist: 0,
            value: MaybeUninit::uninit(),
        }
    }

    #[inline(always)]
    fn is_occupied(&self) -> bool {
        self.dist != 0
    }
}

/// Position of an element inside a [`RobinHoodSet`].
///
/// A bucket is only meaningful until the set is next modified: inserts and
/// erasures move elements between buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bucket {
    index: usize,
}

impl Bucket {
    /// Index of the node in the table.
    #[inline]
    pub fn index(self) -> usize {
        self.index
    }
}

/// A hash multiset using Robin Hood open addressing with backward-shift
/// deletion.
pub struct RobinHoodSet<T, S = RandomState> {
    nodes: Box<[Node<T>]>,
    len: usize,
    threshold: usize,
    load_factor: f64,
    hash_builder: S,
}

impl<T> RobinHoodSet<T, RandomState> {
    /// Creates an empty set. Nothing is allocated until the first insert.
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }

    /// Creates an empty set with at least `capacity` buckets, rounded up to a
    /// power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::new())
    }

    /// Builds an empty set from validated settings.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidLoadFactor`] for a load factor outside
    /// `(0, 1]`.
    pub fn from_config(config: &RobinHoodConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_capacity(config.initial_capacity).with_load_factor(config.load_factor))
    }
}

impl<T, S> RobinHoodSet<T, S> {
    /// Creates an empty set using `hash_builder`.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates an empty set with at least `capacity` buckets using
    /// `hash_builder`.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        let capacity = if capacity == 0 {
            0
        } else {
            capacity.next_power_of_two().max(MIN_CAPACITY)
        };
        Self {
            nodes: alloc_nodes(capacity),
            len: 0,
            threshold: threshold_for(capacity, DEFAULT_LOAD_FACTOR),
            load_factor: DEFAULT_LOAD_FACTOR,
            hash_builder,
        }
    }

    /// Sets the fraction of buckets that may fill before the table doubles.
    ///
    /// # Panics
    /// Panics if `load_factor` is not in `(0, 1]`.
    #[must_use]
    pub fn with_load_factor(mut self, load_factor: f64) -> Self {
        assert!(
            load_factor > 0.0 && load_factor <= 1.0,
            "load factor must be in (0, 1], got {load_factor}"
        );
        self.load_factor = load_factor;
        self.threshold = threshold_for(self.capacity(), load_factor);
        self
    }

    /// Number of stored elements, duplicates included.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the set holds no elements.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of buckets.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Element count at which the next insert doubles the table.
    #[inline]
    pub fn load_threshold(&self) -> usize {
        self.threshold
    }

    /// Configured load factor.
    #[inline]
    pub fn load_factor(&self) -> f64 {
        self.load_factor
    }

    /// The set's hasher.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// The element stored at `bucket`, if any.
    #[inline]
    pub fn get(&self, bucket: Bucket) -> Option<&T> {
        self.nodes
            .get(bucket.index)
            .filter(|node| node.is_occupied())
            // SAFETY: occupied nodes hold an initialized value.
            .map(|node| unsafe { node.value.assume_init_ref() })
    }

    /// Removes the element at `bucket` and closes the gap by shifting the
    /// following displaced elements back one slot.
    ///
    /// Returns `None` if the bucket is out of range or empty.
    pub fn erase(&mut self, bucket: Bucket) -> Option<T> {
        let mut hole = bucket.index;
        let node = self.nodes.get_mut(hole)?;
        if !node.is_occupied() {
            return None;
        }
        node.dist = 0;
        // SAFETY: the node was occupied and is now marked empty.
        let value = unsafe { node.value.assume_init_read() };

        let mask = self.capacity() - 1;
        loop {
            let next = (hole + 1) & mask;
            let dist = self.nodes[next].dist;
            // Empty, or already in its ideal bucket.
            if dist <= 1 {
                break;
            }
            self.nodes[next].dist = 0;
            // SAFETY: `next` was occupied; ownership moves into the hole.
            let moved = unsafe { self.nodes[next].value.assume_init_read() };
            let target = &mut self.nodes[hole];
            target.value.write(moved);
            target.dist = dist - 1;
            hole = next;
        }

        self.len -= 1;
        Some(value)
    }

    /// Drops every element, keeping the allocated table.
    pub fn clear(&mut self) {
        for node in self.nodes.iter_mut().filter(|n| n.is_occupied()) {
            node.dist = 0;
            // SAFETY: occupied, and now marked empty.
            unsafe { node.value.assume_init_drop() };
        }
        self.len = 0;
    }

    /// Iterates over the elements in table order, skipping empty buckets.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            nodes: self.nodes.iter(),
            remaining: self.len,
        }
    }

    fn grow(&mut self)
    where
        T: Hash,
        S: BuildHasher,
    {
        let old_capacity = self.capacity();
        let new_capacity = (old_capacity * 2).max(MIN_CAPACITY);
        let old = mem::replace(&mut self.nodes, alloc_nodes(new_capacity));
        self.threshold = threshold_for(new_capacity, self.load_factor);

        for node in old.into_vec() {
            if node.is_occupied() {
                // SAFETY: occupied nodes hold an initialized value; the old
                // table is consumed without dropping values.
                let value = unsafe { node.value.assume_init() };
                self.place(value);
            }
        }

        trace_event!(old_capacity, new_capacity, len = self.len, "robin hood set rehashed");
    }

    /// Robin Hood placement. Returns where `value` itself came to rest. The
    /// caller guarantees at least one empty node.
    fn place(&mut self, value: T) -> usize
    where
        T: Hash,
        S: BuildHasher,
    {
        let mask = self.capacity() - 1;
        let mut idx = self.ideal_index(&value);
        let mut dist = 1;
        let mut carried = value;
        let mut landed = None;

        loop {
            let node = &mut self.nodes[idx];
            if !node.is_occupied() {
                node.value.write(carried);
                node.dist = dist;
                return landed.unwrap_or(idx);
            }
            if dist > node.dist {
                // SAFETY: occupied; immediately refilled with `carried`.
                let resident = unsafe { node.value.assume_init_read() };
                node.value.write(carried);
                mem::swap(&mut node.dist, &mut dist);
                carried = resident;
                landed.get_or_insert(idx);
            }
            idx = (idx + 1) & mask;
            dist += 1;
        }
    }

    #[inline(always)]
    fn ideal_index<Q>(&self, key: &Q) -> usize
    where
        Q: Hash + ?Sized,
        S: BuildHasher,
    {
        #[allow(clippy::cast_possible_truncation)]
        let hash = self.hash_builder.hash_one(key) as usize;
        hash & (self.capacity() - 1)
    }
}

impl<T, S> RobinHoodSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    /// Inserts `value`, doubling the table first until the element count is
    /// below the load threshold. Equal elements are stored again.
    ///
    /// Returns the bucket `value` landed in.
    pub fn insert(&mut self, value: T) -> Bucket {
        // A lowered load factor can leave `len` above the threshold.
        while self.len >= self.threshold {
            self.grow();
        }
        let index = self.place(value);
        self.len += 1;
        Bucket { index }
    }

    /// Finds a bucket holding an element equal to `key`.
    pub fn find<Q>(&self, key: &Q) -> Option<Bucket>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut found = None;
        self.probe(key, |index| {
            found = Some(Bucket { index });
            true
        });
        found
    }

    /// Returns `true` if an element equal to `key` is stored.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).is_some()
    }

    /// Number of stored elements equal to `key`.
    pub fn count<Q>(&self, key: &Q) -> usize
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut count = 0;
        self.probe(key, |_| {
            count += 1;
            false
        });
        count
    }

    /// Removes one element equal to `key`.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<T>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let bucket = self.find(key)?;
        self.erase(bucket)
    }

    /// Walks the probe run of `key`, calling `hit` with the index of each
    /// equal element until it returns `true`. Equal elements share an ideal
    /// bucket, so only nodes whose distance matches the probe distance are
    /// compared.
    fn probe<Q>(&self, key: &Q, mut hit: impl FnMut(usize) -> bool)
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.len == 0 {
            return;
        }
        let mask = self.capacity() - 1;
        let mut idx = self.ideal_index(key);
        let mut dist = 1;
        loop {
            let node = &self.nodes[idx];
            // Empty, or an element closer to home than `key` would be.
            if node.dist < dist {
                return;
            }
            // SAFETY: `node.dist >= 1`, so the node is occupied.
            if node.dist == dist && unsafe { node.value.assume_init_ref() }.borrow() == key && hit(idx) {
                return;
            }
            idx = (idx + 1) & mask;
            dist += 1;
        }
    }
}

impl<T, S> Drop for RobinHoodSet<T, S> {
    fn drop(&mut self) {
        if mem::needs_drop::<T>() {
            self.clear();
        }
    }
}

impl<T: Clone, S: Clone> Clone for RobinHoodSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    /// Deep copy: elements are re-inserted into a freshly sized table.
    fn clone(&self) -> Self {
        let mut out = Self::with_capacity_and_hasher(self.capacity(), self.hash_builder.clone())
            .with_load_factor(self.load_factor);
        out.extend(self.iter().cloned());
        out
    }
}

impl<T, S: Default> Default for RobinHoodSet<T, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<T: fmt::Debug, S> fmt::Debug for RobinHoodSet<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T, S> Extend<T> for RobinHoodSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.insert(value);
        }
    }
}

impl<T, S> FromIterator<T> for RobinHoodSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::default();
        set.extend(iter);
        set
    }
}

impl<'a, T, S> IntoIterator for &'a RobinHoodSet<T, S> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T, S> IntoIterator for RobinHoodSet<T, S> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(mut self) -> Self::IntoIter {
        let remaining = mem::take(&mut self.len);
        let nodes = mem::take(&mut self.nodes);
        IntoIter {
            back: nodes.len(),
            front: 0,
            nodes,
            remaining,
        }
    }
}

/// Borrowing iterator over a [`RobinHoodSet`].
pub struct Iter<'a, T> {
    nodes: core::slice::Iter<'a, Node<T>>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let node = self.nodes.by_ref().find(|n| n.is_occupied())?;
        self.remaining -= 1;
        // SAFETY: occupied.
        Some(unsafe { node.value.assume_init_ref() })
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> DoubleEndedIterator for Iter<'_, T> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        let node = self.nodes.by_ref().rfind(|n| n.is_occupied())?;
        self.remaining -= 1;
        // SAFETY: occupied.
        Some(unsafe { node.value.assume_init_ref() })
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
impl<T> FusedIterator for Iter<'_, T> {}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            remaining: self.remaining,
        }
    }
}

/// Owning iterator over a [`RobinHoodSet`].
pub struct IntoIter<T> {
    nodes: Box<[Node<T>]>,
    front: usize,
    back: usize,
    remaining: usize,
}

impl<T> IntoIter<T> {
    fn take_at(&mut self, idx: usize) -> Option<T> {
        let node = &mut self.nodes[idx];
        if !node.is_occupied() {
            return None;
        }
        node.dist = 0;
        self.remaining -= 1;
        // SAFETY: was occupied, now marked empty.
        Some(unsafe { node.value.assume_init_read() })
    }
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        while self.front < self.back {
            let idx = self.front;
            self.front += 1;
            if let Some(value) = self.take_at(idx) {
                return Some(value);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> DoubleEndedIterator for IntoIter<T> {
    fn next_back(&mut self) -> Option<T> {
        while self.front < self.back {
            self.back -= 1;
            if let Some(value) = self.take_at(self.back) {
                return Some(value);
            }
        }
        None
    }
}

impl<T> ExactSizeIterator for IntoIter<T> {}
impl<T> FusedIterator for IntoIter<T> {}

impl<T> Drop for IntoIter<T> {
    fn drop(&mut self) {
        for node in self.nodes.iter_mut().filter(|n| n.is_occupied()) {
            // SAFETY: occupied nodes were never yielded.
            unsafe { node.value.assume_init_drop() };
        }
    }
}

fn alloc_nodes<T>(capacity: usize) -> Box<[Node<T>]> {
    (0..capacity).map(|_| Node::empty()).collect()
}

/// Elements allowed before doubling. At least one node always stays empty so
/// that probe runs terminate.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn threshold_for(capacity: usize, load_factor: f64) -> usize {
    if capacity == 0 {
        return 0;
    }
    ((capacity as f64 * load_factor) as usize).clamp(1, capacity - 1)
}
