//! Per-slice ordered stream of entries inside a region

use super::leaf_iter::LeafIterator;
use super::locator::SliceLeafLocator;
use super::{Entry, ReadTransaction};
use crate::error::Result;
use crate::region::Region;

/// Yields every entry of one slice whose key lies in `region`, in key order.
///
/// The locator already starts at the first key ≥ `region.start`, so the left
/// bound only needs checking on the very first entry. The right bound is
/// checked on every entry; the first key beyond it ends iteration for good.
#[derive(Debug)]
pub struct SliceKeyIterator {
    locator: SliceLeafLocator,
    leaf: Option<LeafIterator>,
    region: Region,
    started: bool,
    done: bool,
}

impl SliceKeyIterator {
    pub fn new(txn: ReadTransaction, region: Region) -> Self {
        let done = region.is_empty();
        let locator = SliceLeafLocator::new(txn, region.start.clone());
        Self {
            locator,
            leaf: None,
            region,
            started: false,
            done,
        }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub async fn next(&mut self) -> Result<Option<Entry>> {
        if self.done {
            return Ok(None);
        }
        loop {
            let entry = match self.pull().await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    self.finish();
                    return Ok(None);
                }
                Err(err) => {
                    self.finish();
                    return Err(err);
                }
            };

            if !self.started {
                self.started = true;
                if !self.region.admits_start(&entry.key) {
                    continue;
                }
            }

            if self.region.is_past_end(&entry.key) {
                self.finish();
                return Ok(None);
            }
            return Ok(Some(entry));
        }
    }

    /// Locks held by this iterator: locator frames plus the open leaf.
    pub fn held_locks(&self) -> usize {
        self.locator.held_locks() + usize::from(self.leaf.is_some())
    }

    /// Next raw entry across leaf boundaries.
    async fn pull(&mut self) -> Result<Option<Entry>> {
        loop {
            if let Some(leaf) = self.leaf.as_mut() {
                if let Some(entry) = leaf.next().await? {
                    return Ok(Some(entry));
                }
                // Release the exhausted leaf before locking the next one.
                self.leaf = None;
            }
            match self.locator.next_leaf().await? {
                Some(leaf) => self.leaf = Some(leaf),
                None => return Ok(None),
            }
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.leaf = None;
        self.locator.finish();
    }
}
