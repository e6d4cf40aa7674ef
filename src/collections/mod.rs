//! Single-threaded collections.
//!
//! - `robin_hood_set`: open-addressing hash multiset with Robin Hood probing.

pub mod robin_hood_set;

pub use robin_hood_set::{Bucket, IntoIter, Iter, RobinHoodSet};
