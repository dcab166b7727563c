//! K-way merge over ordered sources
//!
//! Each source ("mergee") yields values in ascending order. The merge keeps
//! one pending value per source in a min-heap and always returns the
//! smallest. After returning a value it only needs a replacement from the
//! source that value came from, so that source is recorded in
//! `next_to_pop_from` and refilled on the following call.
//!
//! Equal values from different sources come out in heap order; no source is
//! preferred.

use crate::btree::{Entry, SliceKeyIterator};
use crate::error::Result;
use async_trait::async_trait;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// An ordered source for `MergeIterator`.
#[async_trait]
pub trait Mergee: Send {
    type Item: Ord + Send;

    /// Next value in ascending order, or `None` once exhausted.
    async fn next(&mut self) -> Result<Option<Self::Item>>;

    /// Hint that `next` will be called soon. Must not block.
    fn prefetch(&mut self) {}
}

#[async_trait]
impl Mergee for SliceKeyIterator {
    type Item = Entry;

    async fn next(&mut self) -> Result<Option<Entry>> {
        SliceKeyIterator::next(self).await
    }
}

/// A pending value tagged with the source it came from.
struct HeapElement<T> {
    value: T,
    source: usize,
}

impl<T: Ord> PartialEq for HeapElement<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Ord> Eq for HeapElement<T> {}

impl<T: Ord> PartialOrd for HeapElement<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> Ord for HeapElement<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

pub struct MergeIterator<M: Mergee> {
    mergees: Vec<M>,
    heap: BinaryHeap<Reverse<HeapElement<M::Item>>>,
    /// Source of the value returned last; it owes the heap a replacement.
    next_to_pop_from: Option<usize>,
    primed: bool,
}

impl<M: Mergee> MergeIterator<M> {
    pub fn new(mergees: Vec<M>) -> Self {
        let heap = BinaryHeap::with_capacity(mergees.len());
        Self {
            mergees,
            heap,
            next_to_pop_from: None,
            primed: false,
        }
    }

    pub fn source_count(&self) -> usize {
        self.mergees.len()
    }

    pub async fn next(&mut self) -> Result<Option<M::Item>> {
        if !self.primed {
            self.primed = true;
            for mergee in &mut self.mergees {
                mergee.prefetch();
            }
            for (source, mergee) in self.mergees.iter_mut().enumerate() {
                if let Some(value) = mergee.next().await? {
                    self.heap.push(Reverse(HeapElement { value, source }));
                }
            }
        } else if let Some(source) = self.next_to_pop_from.take() {
            let mergee = &mut self.mergees[source];
            if let Some(value) = mergee.next().await? {
                self.heap.push(Reverse(HeapElement { value, source }));
            }
            mergee.prefetch();
        }

        match self.heap.pop() {
            Some(Reverse(top)) => {
                self.next_to_pop_from = Some(top.source);
                Ok(Some(top.value))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    struct VecMergee {
        items: VecDeque<u32>,
        prefetches: Arc<AtomicUsize>,
        pulls: usize,
        fail_after: Option<usize>,
    }

    impl VecMergee {
        fn new(items: Vec<u32>) -> Self {
            Self {
                items: items.into(),
                prefetches: Arc::new(AtomicUsize::new(0)),
                pulls: 0,
                fail_after: None,
            }
        }
    }

    #[async_trait]
    impl Mergee for VecMergee {
        type Item = u32;

        async fn next(&mut self) -> Result<Option<u32>> {
            if self.fail_after == Some(self.pulls) {
                return Err(Error::Storage("source failed".to_string()));
            }
            self.pulls += 1;
            Ok(self.items.pop_front())
        }

        fn prefetch(&mut self) {
            self.prefetches.fetch_add(1, AtomicOrdering::SeqCst);
        }
    }

    async fn drain(merge: &mut MergeIterator<VecMergee>) -> Result<Vec<u32>> {
        let mut out = Vec::new();
        while let Some(value) = merge.next().await? {
            out.push(value);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_merges_interleaved_sources() -> Result<()> {
        let mut merge = MergeIterator::new(vec![
            VecMergee::new(vec![1, 3, 5]),
            VecMergee::new(vec![2, 4, 6]),
            VecMergee::new(vec![]),
        ]);
        assert_eq!(drain(&mut merge).await?, vec![1, 2, 3, 4, 5, 6]);
        assert!(merge.next().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_no_sources() -> Result<()> {
        let mut merge = MergeIterator::<VecMergee>::new(Vec::new());
        assert!(merge.next().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_prefetch_hints() -> Result<()> {
        let first = VecMergee::new(vec![1, 2, 3]);
        let second = VecMergee::new(vec![10]);
        let first_hints = Arc::clone(&first.prefetches);
        let second_hints = Arc::clone(&second.prefetches);
        let mut merge = MergeIterator::new(vec![first, second]);

        // Priming hints every source once.
        assert_eq!(merge.next().await?, Some(1));
        assert_eq!(first_hints.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(second_hints.load(AtomicOrdering::SeqCst), 1);

        // Each refill hints only the source that was refilled.
        assert_eq!(merge.next().await?, Some(2));
        assert_eq!(first_hints.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(second_hints.load(AtomicOrdering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_pulls_only_from_last_source() -> Result<()> {
        let mut merge = MergeIterator::new(vec![
            VecMergee::new(vec![1, 2, 3, 4]),
            VecMergee::new(vec![100, 200]),
        ]);
        merge.next().await?;
        merge.next().await?;
        merge.next().await?;
        assert_eq!(merge.mergees[0].pulls, 3);
        assert_eq!(merge.mergees[1].pulls, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_source_error_propagates() {
        let mut failing = VecMergee::new(vec![1, 2]);
        failing.fail_after = Some(1);
        let mut merge = MergeIterator::new(vec![failing, VecMergee::new(vec![5])]);
        assert_eq!(merge.next().await.unwrap(), Some(1));
        assert!(merge.next().await.is_err());
    }

    proptest! {
        #[test]
        fn prop_output_is_sorted_union(
            mut sources in prop::collection::vec(prop::collection::vec(0u32..50, 0..20), 0..6)
        ) {
            for source in &mut sources {
                source.sort_unstable();
            }
            let mut expected: Vec<u32> = sources.concat();
            expected.sort_unstable();

            let mut merge = MergeIterator::new(sources.into_iter().map(VecMergee::new).collect());
            let merged = futures::executor::block_on(drain(&mut merge)).unwrap();
            prop_assert_eq!(merged, expected);
        }
    }
}
