//! Node table and scoped node locks
//!
//! Every node sits behind its own `tokio::sync::RwLock`. Locking a node is a
//! suspension point: the task yields until the lock is granted and receives
//! an owned guard. Dropping the guard is the only way a lock is released.

use super::node::{InternalNode, LeafNode, LeafPair, Node, NodeId, ROOT_POINTER_ID};
use super::value::{BlobId, BlobStore, ValueRef};
use crate::error::{Error, Result};
use crate::metrics;
use crate::Key;
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

/// Counts locks currently held on one node table.
#[derive(Debug, Clone, Default)]
struct HeldLocks(Arc<AtomicUsize>);

impl HeldLocks {
    fn acquire(&self) -> LockTicket {
        self.0.fetch_add(1, Ordering::SeqCst);
        metrics::NODE_LOCKS_HELD.inc();
        LockTicket(Arc::clone(&self.0))
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Decrements the held-lock count when its guard goes away.
#[derive(Debug)]
struct LockTicket(Arc<AtomicUsize>);

impl Drop for LockTicket {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
        metrics::NODE_LOCKS_HELD.dec();
    }
}

/// Scoped read lock on one node.
pub struct NodeGuard {
    id: NodeId,
    guard: OwnedRwLockReadGuard<Node>,
    _ticket: LockTicket,
}

impl NodeGuard {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn node(&self) -> &Node {
        &self.guard
    }

    pub fn as_internal(&self) -> Result<&InternalNode> {
        self.guard.as_internal()
    }

    pub fn as_leaf(&self) -> Result<&LeafNode> {
        self.guard.as_leaf()
    }

    pub fn root_child_id(&self) -> Result<Option<NodeId>> {
        self.guard.root_child_id()
    }
}

impl std::fmt::Debug for NodeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeGuard")
            .field("id", &self.id)
            .field("kind", &self.guard.kind())
            .finish()
    }
}

/// Scoped write lock on one node.
pub struct NodeWriteGuard {
    id: NodeId,
    guard: OwnedRwLockWriteGuard<Node>,
    _ticket: LockTicket,
}

impl NodeWriteGuard {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn node(&self) -> &Node {
        &self.guard
    }

    /// Point the root pointer record at `root`, returning the previous root.
    pub fn swap_root(&mut self, root: Option<NodeId>) -> Result<Option<NodeId>> {
        let previous = self.guard.root_child_id()?;
        *self.guard = Node::RootPointer(root);
        Ok(previous)
    }
}

/// One slice's table of nodes.
pub struct NodeStore {
    nodes: DashMap<NodeId, Arc<RwLock<Node>>>,
    next_id: AtomicU64,
    held: HeldLocks,
}

impl NodeStore {
    /// Create a table holding only an empty root pointer.
    pub fn new() -> Self {
        let nodes = DashMap::new();
        nodes.insert(ROOT_POINTER_ID, Arc::new(RwLock::new(Node::RootPointer(None))));
        Self {
            nodes,
            next_id: AtomicU64::new(ROOT_POINTER_ID.0 + 1),
            held: HeldLocks::default(),
        }
    }

    /// Add a node that no reader can reach yet.
    pub fn allocate(&self, node: Node) -> NodeId {
        let id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.nodes.insert(id, Arc::new(RwLock::new(node)));
        id
    }

    fn handle(&self, id: NodeId) -> Result<Arc<RwLock<Node>>> {
        // The map shard lock must not be held across an await.
        self.nodes
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::Corruption(format!("{} is not in the node table", id)))
    }

    /// Read-lock a node.
    pub async fn lock(&self, id: NodeId) -> Result<NodeGuard> {
        let handle = self.handle(id)?;
        let guard = handle.read_owned().await;
        Ok(NodeGuard {
            id,
            guard,
            _ticket: self.held.acquire(),
        })
    }

    /// Write-lock a node. Waits for every reader of the node to finish.
    pub async fn lock_write(&self, id: NodeId) -> Result<NodeWriteGuard> {
        let handle = self.handle(id)?;
        let guard = handle.write_owned().await;
        Ok(NodeWriteGuard {
            id,
            guard,
            _ticket: self.held.acquire(),
        })
    }

    pub fn remove(&self, id: NodeId) {
        self.nodes.remove(&id);
    }

    /// Number of nodes, including the root pointer record.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Locks currently held on this table, readers and writers alike.
    pub fn held_locks(&self) -> usize {
        self.held.get()
    }
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a balanced tree from sorted pairs, bottom-up.
///
/// Returns the new root, or `None` for an empty input. The nodes are
/// allocated in `nodes` but stay unreachable until the caller swaps the root
/// pointer.
pub fn bulk_load(nodes: &NodeStore, pairs: Vec<LeafPair>, capacity: usize) -> Result<Option<NodeId>> {
    if capacity < 2 {
        return Err(Error::InvalidArgument(format!(
            "node capacity must be at least 2, got {}",
            capacity
        )));
    }
    if pairs.windows(2).any(|w| w[0].key >= w[1].key) {
        return Err(Error::InvalidArgument(
            "bulk load input must be sorted by key without duplicates".to_string(),
        ));
    }
    if pairs.is_empty() {
        return Ok(None);
    }

    let mut level: Vec<(Key, NodeId)> = Vec::with_capacity(pairs.len() / capacity + 1);
    let mut chunk = Vec::with_capacity(capacity);
    for pair in pairs {
        chunk.push(pair);
        if chunk.len() == capacity {
            level.push(allocate_leaf(nodes, std::mem::take(&mut chunk)));
        }
    }
    if !chunk.is_empty() {
        level.push(allocate_leaf(nodes, chunk));
    }

    let mut height = 1;
    while level.len() > 1 {
        level = level
            .chunks(capacity)
            .map(|children| {
                let max_key = children[children.len() - 1].0.clone();
                let id = nodes.allocate(Node::Internal(InternalNode::new(children.to_vec())));
                (max_key, id)
            })
            .collect();
        height += 1;
    }

    debug!(height, "bulk loaded tree");
    Ok(level.pop().map(|(_, root)| root))
}

fn allocate_leaf(nodes: &NodeStore, pairs: Vec<LeafPair>) -> (Key, NodeId) {
    let max_key = pairs[pairs.len() - 1].key.clone();
    (max_key, nodes.allocate(Node::Leaf(LeafNode::new(pairs))))
}

/// Remove a detached tree from the table, top-down.
///
/// Each node is write-locked before removal, so this waits for readers still
/// walking the old tree. Readers hold every ancestor of the node they are
/// on, so once a node is write-locked no reader can still reach its
/// subtree. Blobs referenced by removed leaves are dropped unless they are in
/// `live_blobs`.
pub async fn retire_tree(
    nodes: &NodeStore,
    blobs: &BlobStore,
    root: NodeId,
    live_blobs: &HashSet<BlobId>,
) -> Result<usize> {
    let mut queue = VecDeque::from([root]);
    let mut retired = 0;
    while let Some(id) = queue.pop_front() {
        let guard = nodes.lock_write(id).await?;
        match guard.node() {
            Node::Internal(internal) => queue.extend(internal.children()),
            Node::Leaf(leaf) => {
                for pair in leaf.pairs() {
                    if let ValueRef::Large { blob, .. } = pair.value {
                        if !live_blobs.contains(&blob) {
                            blobs.remove(blob);
                        }
                    }
                }
            }
            Node::RootPointer(_) => {
                return Err(Error::Corruption(format!(
                    "{} is a root pointer inside a tree",
                    id
                )))
            }
        }
        drop(guard);
        nodes.remove(id);
        retired += 1;
    }
    Ok(retired)
}

/// Number of levels from the root down to the leftmost leaf, 0 if empty.
pub async fn tree_height(nodes: &NodeStore) -> Result<usize> {
    let pointer = nodes.lock(ROOT_POINTER_ID).await?;
    let Some(root) = pointer.root_child_id()? else {
        return Ok(0);
    };
    let mut current = nodes.lock(root).await?;
    drop(pointer);

    let mut height = 1;
    loop {
        let child = match current.node() {
            Node::Internal(internal) => internal.child_id_at(0)?,
            Node::Leaf(_) => return Ok(height),
            Node::RootPointer(_) => {
                return Err(Error::Corruption(format!(
                    "{} is a root pointer inside a tree",
                    current.id()
                )))
            }
        };
        current = nodes.lock(child).await?;
        height += 1;
    }
}
