//! The sharded store: a fixed partition of the key space into slices

use super::order::{OrderSource, Timestamp};
use super::slice::{Mutation, Slice};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::region::Region;
use crate::Key;
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, instrument};

pub struct ShardedStore {
    config: StoreConfig,
    regions: Vec<Region>,
    slices: Vec<Arc<Slice>>,
    clock: AtomicU64,
    buckets: AtomicU32,
}

impl ShardedStore {
    /// Create an empty store with one slice per region of the configured
    /// partition.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let regions = Region::partition(&config.split_keys())?;
        let slices = (0..regions.len())
            .map(|id| Arc::new(Slice::new(id, &config)))
            .collect();

        info!(
            shards = regions.len(),
            node_capacity = config.node_capacity,
            "Created sharded store"
        );

        Ok(Self {
            config,
            regions,
            slices,
            clock: AtomicU64::new(0),
            buckets: AtomicU32::new(0),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn slices(&self) -> &[Arc<Slice>] {
        &self.slices
    }

    pub fn slice(&self, index: usize) -> Option<&Arc<Slice>> {
        self.slices.get(index)
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Index of the shard owning `key`.
    pub fn shard_for(&self, key: &[u8]) -> usize {
        // Regions are contiguous and sorted; the last one is unbounded.
        self.regions
            .partition_point(|region| region.is_past_end(key))
            .min(self.regions.len() - 1)
    }

    /// Next write timestamp. Strictly increasing across the store.
    pub fn next_timestamp(&self) -> Timestamp {
        Timestamp(self.clock.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// A fresh ordering source for one client stream.
    pub fn order_source(&self) -> OrderSource {
        OrderSource::new(self.buckets.fetch_add(1, Ordering::Relaxed))
    }

    /// Bulk insert: route every pair to its shard and write each shard once.
    #[instrument(skip(self, pairs))]
    pub async fn load<I>(&self, pairs: I) -> Result<usize>
    where
        I: IntoIterator<Item = (Key, Bytes)> + Send,
        I::IntoIter: Send,
    {
        let mut per_shard: Vec<Vec<Mutation>> = vec![Vec::new(); self.slices.len()];
        let mut loaded = 0;
        for (key, value) in pairs {
            per_shard[self.shard_for(&key)].push(Mutation::Put {
                key,
                flags: 0,
                value,
            });
            loaded += 1;
        }

        let timestamp = self.next_timestamp();
        let mut order = self.order_source();
        for (slice, mutations) in self.slices.iter().zip(per_shard) {
            if mutations.is_empty() {
                continue;
            }
            slice.apply(mutations, timestamp, order.next_token()).await?;
        }
        info!(pairs = loaded, "Loaded pairs");
        Ok(loaded)
    }

    /// Total keys across all shards.
    pub async fn count(&self) -> Result<usize> {
        let mut total = 0;
        for slice in &self.slices {
            total += slice.count().await?;
        }
        Ok(total)
    }
}

impl std::fmt::Debug for ShardedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedStore")
            .field("regions", &self.regions)
            .field("slices", &self.slices)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(splits: &[&str]) -> ShardedStore {
        ShardedStore::new(StoreConfig {
            split_points: splits.iter().map(|s| s.to_string()).collect(),
            node_capacity: 4,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_shard_for_routes_by_region() {
        let store = store(&["g", "p"]);
        assert_eq!(store.len(), 3);
        assert_eq!(store.shard_for(b""), 0);
        assert_eq!(store.shard_for(b"apple"), 0);
        assert_eq!(store.shard_for(b"g"), 1);
        assert_eq!(store.shard_for(b"orange"), 1);
        assert_eq!(store.shard_for(b"p"), 2);
        assert_eq!(store.shard_for(b"zebra"), 2);
    }

    #[test]
    fn test_rejects_unsorted_split_points() {
        let result = ShardedStore::new(StoreConfig {
            split_points: vec!["p".into(), "g".into()],
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_timestamps_and_buckets_increase() {
        let store = store(&[]);
        let a = store.next_timestamp();
        let b = store.next_timestamp();
        assert!(b > a);
        assert_ne!(store.order_source().bucket(), store.order_source().bucket());
    }

    #[tokio::test]
    async fn test_load_spreads_keys_over_shards() -> Result<()> {
        let store = store(&["m"]);
        let pairs = ["a", "k", "m", "z"]
            .into_iter()
            .map(|k| (Bytes::from(k), Bytes::from("v")));
        assert_eq!(store.load(pairs).await?, 4);
        assert_eq!(store.slices()[0].count().await?, 2);
        assert_eq!(store.slices()[1].count().await?, 2);
        assert_eq!(store.count().await?, 4);
        Ok(())
    }
}
