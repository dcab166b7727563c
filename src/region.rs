//! Key regions
//!
//! A `Region` is a contiguous interval of the key space with independently
//! open or closed bounds. Regions describe both range queries and the
//! partitioning of the store into shards.
//!
//! ```text
//! [b, g)   start = "b", end = Some("g"), left_open = false, right_open = true
//! (a, +∞)  start = "a", end = None,      left_open = true
//! ```

use crate::error::{Error, Result};
use crate::Key;
use bytes::Bytes;
use std::fmt;

/// A key interval. `end == None` means the region is unbounded above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub start: Key,
    pub end: Option<Key>,
    pub left_open: bool,
    pub right_open: bool,
}

impl Region {
    /// Create a validated region. Fails if `start > end`.
    pub fn new(
        start: impl Into<Key>,
        end: Option<Key>,
        left_open: bool,
        right_open: bool,
    ) -> Result<Self> {
        let start = start.into();
        if let Some(end) = &end {
            if start > *end {
                return Err(Error::InvalidArgument(format!(
                    "region start {:?} is past end {:?}",
                    start, end
                )));
            }
        }
        Ok(Self {
            start,
            end,
            left_open,
            right_open,
        })
    }

    /// `[start, end]`
    pub fn closed(start: impl Into<Key>, end: impl Into<Key>) -> Self {
        Self {
            start: start.into(),
            end: Some(end.into()),
            left_open: false,
            right_open: false,
        }
    }

    /// `[start, end)`
    pub fn half_open(start: impl Into<Key>, end: impl Into<Key>) -> Self {
        Self {
            start: start.into(),
            end: Some(end.into()),
            left_open: false,
            right_open: true,
        }
    }

    /// `[start, +∞)`
    pub fn from_key(start: impl Into<Key>) -> Self {
        Self {
            start: start.into(),
            end: None,
            left_open: false,
            right_open: false,
        }
    }

    /// The whole key space.
    pub fn universe() -> Self {
        Self::from_key(Bytes::new())
    }

    /// True if no key can satisfy both bounds.
    pub fn is_empty(&self) -> bool {
        match &self.end {
            None => false,
            Some(end) => {
                self.start > *end
                    || (self.start == *end && (self.left_open || self.right_open))
            }
        }
    }

    /// True if `key` is not excluded by the left bound.
    pub fn admits_start(&self, key: &[u8]) -> bool {
        match key.cmp(self.start.as_ref()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => !self.left_open,
            std::cmp::Ordering::Less => false,
        }
    }

    /// True if `key` lies beyond the right bound.
    pub fn is_past_end(&self, key: &[u8]) -> bool {
        match &self.end {
            None => false,
            Some(end) => match key.cmp(end.as_ref()) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Equal => self.right_open,
                std::cmp::Ordering::Less => false,
            },
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.admits_start(key) && !self.is_past_end(key)
    }

    /// The overlap of two regions, or `None` if they are disjoint.
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        let (start, left_open) = match self.start.cmp(&other.start) {
            std::cmp::Ordering::Greater => (self.start.clone(), self.left_open),
            std::cmp::Ordering::Less => (other.start.clone(), other.left_open),
            std::cmp::Ordering::Equal => {
                (self.start.clone(), self.left_open || other.left_open)
            }
        };

        let (end, right_open) = match (&self.end, &other.end) {
            (None, None) => (None, false),
            (Some(end), None) => (Some(end.clone()), self.right_open),
            (None, Some(end)) => (Some(end.clone()), other.right_open),
            (Some(a), Some(b)) => match a.cmp(b) {
                std::cmp::Ordering::Less => (Some(a.clone()), self.right_open),
                std::cmp::Ordering::Greater => (Some(b.clone()), other.right_open),
                std::cmp::Ordering::Equal => {
                    (Some(a.clone()), self.right_open || other.right_open)
                }
            },
        };

        let region = Region {
            start,
            end,
            left_open,
            right_open,
        };
        (!region.is_empty()).then_some(region)
    }

    /// Partition the key space at the given split points.
    ///
    /// N strictly increasing split points produce N + 1 regions:
    /// `[∅, s0) [s0, s1) ... [sN-1, +∞)`.
    pub fn partition(split_points: &[Key]) -> Result<Vec<Region>> {
        if split_points.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidArgument(
                "split points must be strictly increasing".to_string(),
            ));
        }
        if split_points.first().is_some_and(|first| first.is_empty()) {
            return Err(Error::InvalidArgument(
                "the empty key cannot be a split point".to_string(),
            ));
        }

        let mut regions = Vec::with_capacity(split_points.len() + 1);
        let mut start = Bytes::new();
        for split in split_points {
            regions.push(Region::half_open(start, split.clone()));
            start = split.clone();
        }
        regions.push(Region::from_key(start));
        Ok(regions)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.left_open { '(' } else { '[' };
        write!(f, "{}{}, ", open, String::from_utf8_lossy(&self.start))?;
        match &self.end {
            Some(end) => {
                let close = if self.right_open { ')' } else { ']' };
                write!(f, "{}{}", String::from_utf8_lossy(end), close)
            }
            None => write!(f, "+inf)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Key {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_new_rejects_inverted_bounds() {
        assert!(Region::new(key("b"), Some(key("a")), false, false).is_err());
        assert!(Region::new(key("a"), Some(key("a")), false, false).is_ok());
    }

    #[test]
    fn test_degenerate_regions_are_empty() {
        assert!(!Region::closed(key("a"), key("a")).is_empty());
        assert!(Region::half_open(key("a"), key("a")).is_empty());
        let left_open = Region {
            left_open: true,
            ..Region::closed(key("a"), key("a"))
        };
        assert!(left_open.is_empty());
        assert!(!Region::universe().is_empty());
    }

    #[test]
    fn test_contains_respects_open_flags() {
        let region = Region {
            start: key("b"),
            end: Some(key("g")),
            left_open: true,
            right_open: true,
        };
        assert!(!region.contains(b"b"));
        assert!(region.contains(b"c"));
        assert!(region.contains(b"f"));
        assert!(!region.contains(b"g"));
        assert!(!region.contains(b"a"));
        assert!(!region.contains(b"h"));
    }

    #[test]
    fn test_intersect() {
        let a = Region::half_open(key("a"), key("m"));
        let b = Region::closed(key("f"), key("z"));
        let overlap = a.intersect(&b).unwrap();
        assert_eq!(overlap, Region::half_open(key("f"), key("m")));

        let disjoint = Region::half_open(key("m"), key("p"));
        assert!(a.intersect(&disjoint).is_none());

        let touching = Region::closed(key("m"), key("p"));
        assert!(Region::closed(key("a"), key("m")).intersect(&touching).is_some());
        assert!(a.intersect(&touching).is_none());

        let unbounded = Region::universe().intersect(&Region::from_key(key("q")));
        assert_eq!(unbounded, Some(Region::from_key(key("q"))));
    }

    #[test]
    fn test_partition_covers_key_space() -> Result<()> {
        let regions = Region::partition(&[key("g"), key("p")])?;
        assert_eq!(regions.len(), 3);
        assert!(regions[0].contains(b""));
        assert!(regions[0].contains(b"f"));
        assert!(regions[1].contains(b"g"));
        assert!(regions[1].contains(b"ozz"));
        assert!(regions[2].contains(b"p"));
        assert!(regions[2].contains(b"\xff\xff"));

        for probe in [&b"a"[..], b"g", b"h", b"p", b"zz"] {
            let owners = regions.iter().filter(|r| r.contains(probe)).count();
            assert_eq!(owners, 1, "key {:?} owned by {} regions", probe, owners);
        }
        Ok(())
    }

    #[test]
    fn test_partition_rejects_unsorted_split_points() {
        assert!(Region::partition(&[key("p"), key("g")]).is_err());
        assert!(Region::partition(&[key("g"), key("g")]).is_err());
        assert!(Region::partition(&[key("")]).is_err());
    }

    #[test]
    fn test_display() {
        let region = Region {
            left_open: true,
            ..Region::half_open(key("a"), key("c"))
        };
        assert_eq!(region.to_string(), "(a, c)");
        assert_eq!(Region::universe().to_string(), "[, +inf)");
    }
}
