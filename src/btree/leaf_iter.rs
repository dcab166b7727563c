//! Iteration over one locked leaf

use super::node::LeafPair;
use super::store::NodeGuard;
use super::{Entry, ReadTransaction};
use crate::error::Result;

/// Yields the pairs of a single leaf in key order.
///
/// Owns the leaf's read guard for its whole lifetime, so the leaf cannot
/// change underneath it. Dropping the iterator releases the lock.
#[derive(Debug)]
pub struct LeafIterator {
    guard: NodeGuard,
    offset: usize,
    txn: ReadTransaction,
}

impl LeafIterator {
    /// Fails with `Corruption` if `guard` does not hold a leaf.
    pub fn new(guard: NodeGuard, offset: usize, txn: ReadTransaction) -> Result<Self> {
        guard.as_leaf()?;
        Ok(Self { guard, offset, txn })
    }

    /// The entry at the current offset, advancing past it.
    pub async fn next(&mut self) -> Result<Option<Entry>> {
        let Some(pair) = self.next_pair()? else {
            return Ok(None);
        };
        let value = self.txn.provide(pair.value).await?;
        Ok(Some(Entry {
            key: pair.key,
            flags: pair.flags,
            value,
        }))
    }

    /// The raw pair at the current offset, advancing past it. Large values
    /// are not opened.
    pub fn next_pair(&mut self) -> Result<Option<LeafPair>> {
        let pair = self.guard.as_leaf()?.pair_at(self.offset).cloned();
        if pair.is_some() {
            self.offset += 1;
        }
        Ok(pair)
    }

    pub fn remaining(&self) -> Result<usize> {
        Ok(self
            .guard
            .as_leaf()?
            .child_count()
            .saturating_sub(self.offset))
    }

    pub fn node_id(&self) -> super::NodeId {
        self.guard.id()
    }
}
