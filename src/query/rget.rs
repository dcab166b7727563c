//! Range-get across every shard of a store

use super::merge::MergeIterator;
use crate::btree::{Entry, SliceKeyIterator};
use crate::error::Result;
use crate::metrics;
use crate::region::Region;
use crate::storage::ShardedStore;
use bytes::Bytes;
use tracing::{debug, instrument};

/// Entries with keys in the given bounds, in key order, at most
/// `max_results` of them.
pub async fn rget(
    store: &ShardedStore,
    start: &[u8],
    end: &[u8],
    left_open: bool,
    right_open: bool,
    max_results: usize,
) -> Result<Vec<Entry>> {
    let region = Region {
        start: Bytes::copy_from_slice(start),
        end: Some(Bytes::copy_from_slice(end)),
        left_open,
        right_open,
    };
    rget_region(store, &region, max_results).await
}

/// Like `rget`, for an arbitrary region (possibly unbounded above).
///
/// An empty region yields an empty list, never an error.
#[instrument(skip(store, region), fields(region = %region))]
pub async fn rget_region(
    store: &ShardedStore,
    region: &Region,
    max_results: usize,
) -> Result<Vec<Entry>> {
    metrics::RGET_TOTAL.inc();
    if max_results == 0 || region.is_empty() {
        return Ok(Vec::new());
    }

    let iterators: Vec<SliceKeyIterator> = store
        .regions()
        .iter()
        .zip(store.slices())
        .filter_map(|(shard, slice)| {
            let overlap = shard.intersect(region)?;
            Some(SliceKeyIterator::new(slice.begin_read(), overlap))
        })
        .collect();
    debug!(shards = iterators.len(), "Merging shard iterators");

    let mut merge = MergeIterator::new(iterators);
    let mut results = Vec::new();
    while results.len() < max_results {
        match merge.next().await? {
            Some(entry) => results.push(entry),
            None => break,
        }
    }

    metrics::RGET_ENTRIES.inc_by(results.len() as u64);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::Key;

    async fn two_shard_store() -> Result<ShardedStore> {
        let store = ShardedStore::new(StoreConfig {
            split_points: vec!["3".to_string()],
            node_capacity: 2,
            ..Default::default()
        })?;
        store
            .load(["1", "2", "3", "4", "5", "6"].map(|k| (Bytes::from(k), Bytes::from(k))))
            .await?;
        Ok(store)
    }

    fn keys(entries: &[Entry]) -> Vec<Key> {
        entries.iter().map(|entry| entry.key.clone()).collect()
    }

    #[tokio::test]
    async fn test_full_range_spans_shards() -> Result<()> {
        let store = two_shard_store().await?;
        let entries = rget_region(&store, &Region::universe(), 100).await?;
        assert_eq!(keys(&entries), vec!["1", "2", "3", "4", "5", "6"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_cap_truncates_in_order() -> Result<()> {
        let store = two_shard_store().await?;
        let entries = rget(&store, b"2", b"6", false, false, 3).await?;
        assert_eq!(keys(&entries), vec!["2", "3", "4"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_cap_and_empty_region() -> Result<()> {
        let store = two_shard_store().await?;
        assert!(rget(&store, b"1", b"6", false, false, 0).await?.is_empty());
        assert!(rget(&store, b"4", b"4", true, false, 10).await?.is_empty());
        assert!(rget(&store, b"5", b"2", false, false, 10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_open_bounds_at_shard_boundary() -> Result<()> {
        let store = two_shard_store().await?;
        let entries = rget(&store, b"2", b"3", true, false, 10).await?;
        assert_eq!(keys(&entries), vec!["3"]);
        let entries = rget(&store, b"2", b"3", false, true, 10).await?;
        assert_eq!(keys(&entries), vec!["2"]);
        Ok(())
    }
}
