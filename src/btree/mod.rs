//! B-tree read path
//!
//! # Architecture
//!
//! ```text
//! SliceKeyIterator        region filtering, one ordered stream per slice
//!   ├─→ SliceLeafLocator  root-to-leaf descent + backtracking stack
//!   │     └─→ TraversalFrame (NodeGuard, child index)
//!   └─→ LeafIterator      pairs of one read-locked leaf
//!
//! NodeStore               node table, owned read/write guards
//! BlobStore               out-of-line values
//! ```
//!
//! A reader only ever holds the path from its current leaf up to the
//! shallowest ancestor that still has unvisited children. Locks are owned
//! guards; dropping an iterator releases everything it holds.

pub mod key_iter;
pub mod leaf_iter;
pub mod locator;
pub mod node;
pub mod store;
pub mod value;

pub use key_iter::SliceKeyIterator;
pub use leaf_iter::LeafIterator;
pub use locator::SliceLeafLocator;
pub use node::{InternalNode, LeafNode, LeafPair, Node, NodeId, ROOT_POINTER_ID};
pub use store::{bulk_load, retire_tree, tree_height, NodeGuard, NodeStore, NodeWriteGuard};
pub use value::{BlobId, BlobStore, LargeValue, ValueProvider, ValueRef};

use crate::error::Result;
use crate::Key;
use std::cmp::Ordering;
use std::sync::Arc;

/// A read session on one slice.
///
/// Cheap to clone; every iterator over the slice carries one so it can lock
/// nodes and open large values.
#[derive(Clone)]
pub struct ReadTransaction {
    nodes: Arc<NodeStore>,
    blobs: Arc<BlobStore>,
}

impl ReadTransaction {
    pub fn new(nodes: Arc<NodeStore>, blobs: Arc<BlobStore>) -> Self {
        Self { nodes, blobs }
    }

    pub fn nodes(&self) -> &NodeStore {
        &self.nodes
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Turn a stored value into something the caller can read. Large values
    /// are locked here, at yield time.
    pub async fn provide(&self, value: ValueRef) -> Result<ValueProvider> {
        match value {
            ValueRef::Inline(bytes) => Ok(ValueProvider::Inline(bytes)),
            ValueRef::Large { blob, len } => {
                Ok(ValueProvider::Large(self.blobs.open(blob, len).await?))
            }
        }
    }
}

impl std::fmt::Debug for ReadTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadTransaction")
            .field("nodes", &self.nodes.len())
            .field("blobs", &self.blobs.len())
            .finish()
    }
}

/// One key/value pair produced by iteration. Owns no node locks.
///
/// Entries compare by key only.
#[derive(Debug)]
pub struct Entry {
    pub key: Key,
    pub flags: u32,
    pub value: ValueProvider,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}
