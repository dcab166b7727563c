//! Slice leaf locator
//!
//! Walks one slice's tree depth-first and hands out, in key order, every leaf
//! that may hold a key ≥ `start`.
//!
//! The first call locks the root pointer, then the root, and descends toward
//! `start`, pushing a `TraversalFrame` for each internal node passed through.
//! Later calls backtrack: pop the deepest frame, step to its next child and
//! descend to that child's leftmost leaf. A frame whose children are all
//! visited is dropped, which releases its node.
//!
//! ```text
//!            [root]           frames: root@1, B@0
//!           /      \
//!        [A]        [B]       held:   root, B, current leaf
//!       /   \      /   \
//!     l0    l1   l2*    l3
//! ```
//!
//! A child is always locked before its parent's guard can go away, so the
//! path a reader holds is never torn.

use super::leaf_iter::LeafIterator;
use super::node::{Node, NodeId, ROOT_POINTER_ID};
use super::store::NodeGuard;
use super::ReadTransaction;
use crate::error::{Error, Result};
use crate::Key;
use tracing::debug;

/// One level of an in-progress descent.
#[derive(Debug)]
struct TraversalFrame {
    guard: NodeGuard,
    index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocatorState {
    Fresh,
    Walking,
    Exhausted,
}

/// What to do with the node just locked during the initial descent.
enum Step {
    Descend { child: NodeId, index: usize },
    Backtrack,
    Leaf { offset: usize },
}

#[derive(Debug)]
pub struct SliceLeafLocator {
    txn: ReadTransaction,
    start: Key,
    frames: Vec<TraversalFrame>,
    state: LocatorState,
}

impl SliceLeafLocator {
    pub fn new(txn: ReadTransaction, start: Key) -> Self {
        Self {
            txn,
            start,
            frames: Vec::new(),
            state: LocatorState::Fresh,
        }
    }

    /// The next leaf in key order, positioned at its first key ≥ `start`.
    pub async fn next_leaf(&mut self) -> Result<Option<LeafIterator>> {
        let result = match self.state {
            LocatorState::Exhausted => return Ok(None),
            LocatorState::Fresh => {
                self.state = LocatorState::Walking;
                self.first_leaf().await
            }
            LocatorState::Walking => self.backtrack().await,
        };
        if result.is_err() {
            self.finish();
        }
        result
    }

    /// Internal nodes currently locked by this locator. The leaf handed out
    /// last is owned by its `LeafIterator` and is not counted here.
    pub fn held_locks(&self) -> usize {
        self.frames.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == LocatorState::Exhausted
    }

    /// Release every frame and stop.
    pub fn finish(&mut self) {
        self.frames.clear();
        self.state = LocatorState::Exhausted;
    }

    async fn first_leaf(&mut self) -> Result<Option<LeafIterator>> {
        let nodes = self.txn.nodes();
        let pointer = nodes.lock(ROOT_POINTER_ID).await?;
        let Some(root) = pointer.root_child_id()? else {
            debug!("empty tree");
            self.finish();
            return Ok(None);
        };
        let mut current = nodes.lock(root).await?;
        drop(pointer);

        loop {
            let step = match current.node() {
                Node::Internal(internal) => {
                    let index = internal.find_offset(&self.start);
                    if index >= internal.child_count() {
                        Step::Backtrack
                    } else {
                        Step::Descend {
                            child: internal.child_id_at(index)?,
                            index,
                        }
                    }
                }
                Node::Leaf(leaf) => {
                    let offset = leaf.find_offset(&self.start);
                    if offset >= leaf.child_count() {
                        Step::Backtrack
                    } else {
                        Step::Leaf { offset }
                    }
                }
                Node::RootPointer(_) => return Err(nested_root_pointer(current.id())),
            };

            match step {
                Step::Descend { child, index } => {
                    let next = nodes.lock(child).await?;
                    self.frames.push(TraversalFrame {
                        guard: current,
                        index,
                    });
                    current = next;
                }
                Step::Backtrack => {
                    debug!(node = %current.id(), "subtree below start, backtracking");
                    drop(current);
                    return self.backtrack().await;
                }
                Step::Leaf { offset } => {
                    return LeafIterator::new(current, offset, self.txn.clone()).map(Some);
                }
            }
        }
    }

    async fn backtrack(&mut self) -> Result<Option<LeafIterator>> {
        loop {
            let Some(mut frame) = self.frames.pop() else {
                self.finish();
                return Ok(None);
            };
            frame.index += 1;

            let internal = frame.guard.as_internal()?;
            if frame.index < internal.child_count() {
                let child = internal.child_id_at(frame.index)?;
                let next = self.txn.nodes().lock(child).await?;
                self.frames.push(frame);
                return self.descend_leftmost(next).await;
            }
            // Every child visited; dropping the frame releases the node.
            drop(frame);
        }
    }

    async fn descend_leftmost(&mut self, node: NodeGuard) -> Result<Option<LeafIterator>> {
        let mut current = node;
        loop {
            let child = match current.node() {
                Node::Internal(internal) => {
                    if internal.child_count() == 0 {
                        return Err(Error::Corruption(format!(
                            "internal {} has no children",
                            current.id()
                        )));
                    }
                    internal.child_id_at(0)?
                }
                Node::Leaf(_) => {
                    return LeafIterator::new(current, 0, self.txn.clone()).map(Some);
                }
                Node::RootPointer(_) => return Err(nested_root_pointer(current.id())),
            };
            let next = self.txn.nodes().lock(child).await?;
            self.frames.push(TraversalFrame {
                guard: current,
                index: 0,
            });
            current = next;
        }
    }
}

fn nested_root_pointer(id: NodeId) -> Error {
    Error::Corruption(format!("{} is a root pointer inside a tree", id))
}
