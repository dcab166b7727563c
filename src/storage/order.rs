//! Logical timestamps and ordering tokens
//!
//! Writes carry a `Timestamp` from the store's clock. Every operation also
//! carries an `OrderToken` from the `OrderSource` of the client stream that
//! issued it; a slice rejects tokens that go backwards within one bucket.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// Logical write timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderToken {
    pub bucket: u32,
    pub value: u64,
}

impl fmt::Display for OrderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bucket, self.value)
    }
}

/// Issues increasing tokens for one client stream.
#[derive(Debug)]
pub struct OrderSource {
    bucket: u32,
    next: u64,
}

impl OrderSource {
    pub fn new(bucket: u32) -> Self {
        Self { bucket, next: 0 }
    }

    pub fn bucket(&self) -> u32 {
        self.bucket
    }

    pub fn next_token(&mut self) -> OrderToken {
        let token = OrderToken {
            bucket: self.bucket,
            value: self.next,
        };
        self.next += 1;
        token
    }
}

/// Last token seen per bucket on one slice.
#[derive(Debug, Default)]
pub struct OrderCheckpoint {
    last: HashMap<u32, u64>,
}

impl OrderCheckpoint {
    /// Record `token`. Equal tokens are allowed so that the pieces of a
    /// parallelized operation can share one.
    pub fn check(&mut self, token: OrderToken) -> Result<()> {
        let last = self.last.entry(token.bucket).or_insert(token.value);
        if token.value < *last {
            return Err(Error::OrderViolation(format!(
                "token {} arrived after {}:{}",
                token, token.bucket, last
            )));
        }
        *last = token.value;
        Ok(())
    }
}
