//! Range queries
//!
//! # Architecture
//!
//! ```text
//! rget(start, end, left_open, right_open, max_results)
//!   └─→ MergeIterator (min-heap, one pending entry per shard)
//!        ├─→ SliceKeyIterator (shard 0 ∩ query region)
//!        ├─→ SliceKeyIterator (shard 1 ∩ query region)
//!        └─→ ...
//! ```
//!
//! Shards whose region does not overlap the query are never opened.

pub mod merge;
pub mod rget;

pub use merge::{MergeIterator, Mergee};
pub use rget::{rget, rget_region};
