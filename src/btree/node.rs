//! Node views
//!
//! Internal nodes hold `(separator, child)` pairs where the separator is the
//! largest key stored in the child's subtree. Leaves hold `(key, value)`
//! pairs. Both are sorted by key, so the same `find_offset` rule (first index
//! whose key is ≥ the probe) locates the child that may contain a key and the
//! first leaf pair at or after it.

use super::value::ValueRef;
use crate::error::{Error, Result};
use crate::Key;
use std::fmt;

/// Identifier of a node within one slice's node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

/// Reserved record holding the id of the current root.
pub const ROOT_POINTER_ID: NodeId = NodeId(0);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// One key/value pair stored in a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafPair {
    pub key: Key,
    /// Opaque metadata flags carried alongside the value.
    pub flags: u32,
    pub value: ValueRef,
}

impl LeafPair {
    pub fn new(key: Key, flags: u32, value: ValueRef) -> Self {
        Self { key, flags, value }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InternalNode {
    pairs: Vec<(Key, NodeId)>,
}

impl InternalNode {
    pub fn new(pairs: Vec<(Key, NodeId)>) -> Self {
        Self { pairs }
    }

    pub fn child_count(&self) -> usize {
        self.pairs.len()
    }

    /// Index of the first child whose separator is ≥ `key`.
    ///
    /// Returns `child_count()` when every key in this subtree is below `key`.
    pub fn find_offset(&self, key: &[u8]) -> usize {
        self.pairs.partition_point(|(sep, _)| sep.as_ref() < key)
    }

    pub fn child_id_at(&self, index: usize) -> Result<NodeId> {
        self.pairs
            .get(index)
            .map(|(_, child)| *child)
            .ok_or_else(|| {
                Error::Corruption(format!(
                    "child index {} out of bounds for internal node with {} children",
                    index,
                    self.pairs.len()
                ))
            })
    }

    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.pairs.iter().map(|(_, child)| *child)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LeafNode {
    pairs: Vec<LeafPair>,
}

impl LeafNode {
    pub fn new(pairs: Vec<LeafPair>) -> Self {
        Self { pairs }
    }

    pub fn child_count(&self) -> usize {
        self.pairs.len()
    }

    /// Index of the first pair whose key is ≥ `key`.
    pub fn find_offset(&self, key: &[u8]) -> usize {
        self.pairs.partition_point(|pair| pair.key.as_ref() < key)
    }

    pub fn pair_at(&self, index: usize) -> Option<&LeafPair> {
        self.pairs.get(index)
    }

    pub fn pairs(&self) -> &[LeafPair] {
        &self.pairs
    }
}

/// Decoded node contents.
#[derive(Debug, Clone)]
pub enum Node {
    RootPointer(Option<NodeId>),
    Internal(InternalNode),
    Leaf(LeafNode),
}

impl Node {
    pub fn kind(&self) -> &'static str {
        match self {
            Node::RootPointer(_) => "root pointer",
            Node::Internal(_) => "internal",
            Node::Leaf(_) => "leaf",
        }
    }

    pub fn as_internal(&self) -> Result<&InternalNode> {
        match self {
            Node::Internal(node) => Ok(node),
            other => Err(Error::Corruption(format!(
                "expected internal node, found {}",
                other.kind()
            ))),
        }
    }

    pub fn as_leaf(&self) -> Result<&LeafNode> {
        match self {
            Node::Leaf(node) => Ok(node),
            other => Err(Error::Corruption(format!(
                "expected leaf node, found {}",
                other.kind()
            ))),
        }
    }

    /// Root id stored in the root pointer record.
    pub fn root_child_id(&self) -> Result<Option<NodeId>> {
        match self {
            Node::RootPointer(Some(root)) if *root == ROOT_POINTER_ID => Err(
                Error::Corruption("root pointer points to itself".to_string()),
            ),
            Node::RootPointer(root) => Ok(*root),
            other => Err(Error::Corruption(format!(
                "expected root pointer, found {}",
                other.kind()
            ))),
        }
    }
}
