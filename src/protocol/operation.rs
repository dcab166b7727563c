//! Read and write operations
//!
//! An operation declares the keys it touches, splits itself into one
//! sub-operation per region it overlaps, and runs a sub-operation against a
//! single slice. Read operations may additionally split into independent
//! pieces that run concurrently on the same slice.

use super::result::CommandResult;
use crate::error::Result;
use crate::region::Region;
use crate::storage::{OrderToken, Slice, Timestamp};
use crate::Key;
use async_trait::async_trait;
use std::fmt;

/// The keys an operation touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySet {
    Single(Key),
    Multi(Vec<Key>),
    /// Every shard, regardless of keys.
    All,
}

impl KeySet {
    /// Whether any of these keys falls in `region`.
    pub fn intersects(&self, region: &Region) -> bool {
        match self {
            KeySet::Single(key) => region.contains(key),
            KeySet::Multi(keys) => keys.iter().any(|key| region.contains(key)),
            KeySet::All => !region.is_empty(),
        }
    }
}

#[async_trait]
pub trait ReadOperation: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn get_keys(&self) -> KeySet;

    /// One sub-operation per region this operation overlaps, tagged with the
    /// region's index. Pure: touches no storage.
    fn shard(&self, regions: &[Region]) -> Vec<(usize, Box<dyn ReadOperation>)>;

    /// Split into at most `factor` independent pieces. `None` keeps the
    /// operation whole.
    fn parallelize(&self, _factor: usize) -> Option<Vec<Box<dyn ReadOperation>>> {
        None
    }

    async fn execute(&self, slice: &Slice, token: OrderToken) -> Result<CommandResult>;
}

#[async_trait]
pub trait WriteOperation: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn get_keys(&self) -> KeySet;

    fn shard(&self, regions: &[Region]) -> Vec<(usize, Box<dyn WriteOperation>)>;

    async fn execute(
        &self,
        slice: &Slice,
        timestamp: Timestamp,
        token: OrderToken,
    ) -> Result<CommandResult>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_key_set_intersects() {
        let region = Region::half_open(Bytes::from("g"), Bytes::from("p"));
        assert!(KeySet::Single(Bytes::from("k")).intersects(&region));
        assert!(!KeySet::Single(Bytes::from("p")).intersects(&region));
        assert!(KeySet::Multi(vec![Bytes::from("a"), Bytes::from("h")]).intersects(&region));
        assert!(!KeySet::Multi(Vec::new()).intersects(&region));
        assert!(KeySet::All.intersects(&region));
    }
}
