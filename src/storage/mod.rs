//! Storage layer
//!
//! # Architecture
//!
//! The key space is partitioned into regions by configured split points.
//! Each region is served by one slice with its own tree and blob store:
//!
//! ```text
//! ShardedStore (regions, clock, order buckets)
//!   └─→ Slice[i]  (NodeStore, BlobStore, writer lock, order checkpoint)
//!        └─→ B-tree rooted at ROOT_POINTER_ID
//! ```
//!
//! Reads never take the writer lock. A write snapshots the slice, rebuilds
//! its tree and swaps the root pointer; the old tree is retired once no
//! reader holds any of its nodes.

pub mod order;
pub mod sharded;
pub mod slice;

pub use order::{OrderCheckpoint, OrderSource, OrderToken, Timestamp};
pub use sharded::ShardedStore;
pub use slice::{Mutation, Slice, WriteTransaction};
