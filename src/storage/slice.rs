//! A slice: one independently locked shard with its own B-tree

use super::order::{OrderCheckpoint, OrderToken, Timestamp};
use crate::btree::{
    bulk_load, retire_tree, tree_height, BlobId, BlobStore, Entry, LeafPair, NodeStore,
    ReadTransaction, SliceKeyIterator, SliceLeafLocator, ValueRef, ROOT_POINTER_ID,
};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::region::Region;
use crate::Key;
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, instrument};

pub struct Slice {
    id: usize,
    nodes: Arc<NodeStore>,
    blobs: Arc<BlobStore>,
    node_capacity: usize,
    large_value_threshold: usize,
    /// Serializes writers; readers never take it.
    writer: Mutex<()>,
    last_timestamp: AtomicU64,
    checkpoint: parking_lot::Mutex<OrderCheckpoint>,
}

impl Slice {
    pub fn new(id: usize, config: &StoreConfig) -> Self {
        Self {
            id,
            nodes: Arc::new(NodeStore::new()),
            blobs: Arc::new(BlobStore::new(config.large_value_chunk_size)),
            node_capacity: config.node_capacity,
            large_value_threshold: config.large_value_threshold,
            writer: Mutex::new(()),
            last_timestamp: AtomicU64::new(0),
            checkpoint: parking_lot::Mutex::new(OrderCheckpoint::default()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn nodes(&self) -> &NodeStore {
        &self.nodes
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Open a read session.
    pub fn begin_read(&self) -> ReadTransaction {
        ReadTransaction::new(Arc::clone(&self.nodes), Arc::clone(&self.blobs))
    }

    /// Record an operation's ordering token, rejecting regressions.
    pub fn check_order(&self, token: OrderToken) -> Result<()> {
        self.checkpoint.lock().check(token)
    }

    /// Newest write timestamp applied to this slice.
    pub fn last_timestamp(&self) -> Timestamp {
        Timestamp(self.last_timestamp.load(Ordering::SeqCst))
    }

    /// Point lookup.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        let key = Bytes::copy_from_slice(key);
        let mut iter = SliceKeyIterator::new(self.begin_read(), Region::closed(key.clone(), key));
        iter.next().await
    }

    /// Number of stored keys.
    pub async fn count(&self) -> Result<usize> {
        let mut locator = SliceLeafLocator::new(self.begin_read(), Bytes::new());
        let mut total = 0;
        while let Some(leaf) = locator.next_leaf().await? {
            total += leaf.remaining()?;
        }
        Ok(total)
    }

    /// Every stored pair in key order. Large values are not opened.
    pub async fn scan_pairs(&self) -> Result<Vec<LeafPair>> {
        let mut locator = SliceLeafLocator::new(self.begin_read(), Bytes::new());
        let mut pairs = Vec::new();
        while let Some(mut leaf) = locator.next_leaf().await? {
            while let Some(pair) = leaf.next_pair()? {
                pairs.push(pair);
            }
        }
        Ok(pairs)
    }

    pub async fn height(&self) -> Result<usize> {
        tree_height(&self.nodes).await
    }

    /// Start a write. Waits for any other writer on this slice.
    ///
    /// Must not be called while the same task holds an iterator on this
    /// slice: committing waits for readers of the old tree.
    pub async fn begin_write(
        &self,
        timestamp: Timestamp,
        token: OrderToken,
    ) -> Result<WriteTransaction<'_>> {
        let writer = self.writer.lock().await;
        self.check_order(token)?;
        let pairs = self
            .scan_pairs()
            .await?
            .into_iter()
            .map(|pair| (pair.key, (pair.flags, Pending::Stored(pair.value))))
            .collect();
        Ok(WriteTransaction {
            slice: self,
            _writer: writer,
            timestamp,
            pairs,
            dirty: false,
        })
    }

    /// Apply a batch of mutations in one write.
    pub async fn apply(
        &self,
        mutations: Vec<Mutation>,
        timestamp: Timestamp,
        token: OrderToken,
    ) -> Result<()> {
        let mut txn = self.begin_write(timestamp, token).await?;
        for mutation in mutations {
            match mutation {
                Mutation::Put { key, flags, value } => txn.put(key, flags, value),
                Mutation::Delete { key } => {
                    txn.delete(&key);
                }
            }
        }
        txn.commit().await
    }
}

impl std::fmt::Debug for Slice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slice")
            .field("id", &self.id)
            .field("nodes", &self.nodes.len())
            .field("blobs", &self.blobs.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Put { key: Key, flags: u32, value: Bytes },
    Delete { key: Key },
}

#[derive(Debug)]
enum Pending {
    Stored(ValueRef),
    Fresh(Bytes),
}

/// Buffered writes against one slice.
///
/// The slice's contents are snapshotted when the write begins; `commit`
/// bulk-loads a new tree, swaps the root pointer and retires the old tree.
pub struct WriteTransaction<'a> {
    slice: &'a Slice,
    _writer: MutexGuard<'a, ()>,
    timestamp: Timestamp,
    pairs: BTreeMap<Key, (u32, Pending)>,
    dirty: bool,
}

impl<'a> WriteTransaction<'a> {
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.pairs.contains_key(key)
    }

    pub fn flags(&self, key: &[u8]) -> Option<u32> {
        self.pairs.get(key).map(|(flags, _)| *flags)
    }

    /// Current value of `key`, including writes buffered in this transaction.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        match self.pairs.get(key) {
            None => Ok(None),
            Some((_, Pending::Fresh(bytes))) => Ok(Some(bytes.clone())),
            Some((_, Pending::Stored(value))) => {
                let value = self.slice.begin_read().provide(value.clone()).await?;
                value.into_bytes().map(Some)
            }
        }
    }

    pub fn put(&mut self, key: Key, flags: u32, value: Bytes) {
        self.pairs.insert(key, (flags, Pending::Fresh(value)));
        self.dirty = true;
    }

    /// Returns whether the key was present.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        let removed = self.pairs.remove(key).is_some();
        self.dirty |= removed;
        removed
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    #[instrument(skip(self), fields(slice = self.slice.id, timestamp = %self.timestamp))]
    pub async fn commit(self) -> Result<()> {
        let slice = self.slice;
        if !self.dirty {
            return Ok(());
        }

        let mut live_blobs: HashSet<BlobId> = HashSet::new();
        let mut pairs = Vec::with_capacity(self.pairs.len());
        for (key, (flags, pending)) in self.pairs {
            let value = match pending {
                Pending::Stored(value) => value,
                Pending::Fresh(bytes) if bytes.len() > slice.large_value_threshold => {
                    slice.blobs.store(&bytes)
                }
                Pending::Fresh(bytes) => ValueRef::Inline(bytes),
            };
            if let ValueRef::Large { blob, .. } = &value {
                live_blobs.insert(*blob);
            }
            pairs.push(LeafPair::new(key, flags, value));
        }
        let count = pairs.len();

        let root = bulk_load(&slice.nodes, pairs, slice.node_capacity)?;
        let previous = {
            let mut pointer = slice.nodes.lock_write(ROOT_POINTER_ID).await?;
            pointer.swap_root(root)?
        };
        slice
            .last_timestamp
            .fetch_max(self.timestamp.0, Ordering::SeqCst);

        let retired = match previous {
            Some(old_root) => retire_tree(&slice.nodes, &slice.blobs, old_root, &live_blobs).await?,
            None => 0,
        };
        debug!(keys = count, retired, "Committed slice write");
        Ok(())
    }
}
