//! Values: inline bytes or out-of-line blobs
//!
//! Small values live directly in the leaf. Values longer than the slice's
//! threshold are split into chunks and kept in a `BlobStore`; the leaf only
//! stores a `ValueRef::Large` pointing at them. Readers get a `ValueProvider`
//! which exposes the same contract for both variants.

use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use std::fmt;
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};

/// Identifier of an out-of-line value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId(pub u64);

/// Value as stored in a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueRef {
    Inline(Bytes),
    Large { blob: BlobId, len: u64 },
}

impl ValueRef {
    pub fn is_large(&self) -> bool {
        matches!(self, ValueRef::Large { .. })
    }

    pub fn len(&self) -> u64 {
        match self {
            ValueRef::Inline(bytes) => bytes.len() as u64,
            ValueRef::Large { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Chunked storage for large values.
pub struct BlobStore {
    blobs: DashMap<BlobId, Arc<RwLock<Vec<Bytes>>>>,
    next_id: AtomicU64,
    chunk_size: usize,
}

impl BlobStore {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            blobs: DashMap::new(),
            next_id: AtomicU64::new(1),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Store `value` out-of-line and return the reference to it.
    pub fn store(&self, value: &Bytes) -> ValueRef {
        let id = BlobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let chunks = value
            .chunks(self.chunk_size)
            .map(Bytes::copy_from_slice)
            .collect::<Vec<_>>();
        self.blobs.insert(id, Arc::new(RwLock::new(chunks)));
        ValueRef::Large {
            blob: id,
            len: value.len() as u64,
        }
    }

    /// Open a blob for sequential reading. Suspends until the blob's read
    /// lock is granted.
    pub async fn open(&self, blob: BlobId, len: u64) -> Result<LargeValue> {
        // Clone the lock handle out of the map before awaiting on it.
        let lock = self
            .blobs
            .get(&blob)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::Corruption(format!("missing blob {:?}", blob)))?;
        let chunks = lock.read_owned().await;
        let stored: u64 = chunks.iter().map(|chunk| chunk.len() as u64).sum();
        if stored != len {
            return Err(Error::Corruption(format!(
                "blob {:?} holds {} bytes, leaf expects {}",
                blob, stored, len
            )));
        }
        Ok(LargeValue {
            chunks,
            len,
            chunk: 0,
            offset: 0,
        })
    }

    pub fn remove(&self, blob: BlobId) {
        self.blobs.remove(&blob);
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

/// Read handle on an out-of-line value. Holds the blob's read lock until
/// dropped.
pub struct LargeValue {
    chunks: OwnedRwLockReadGuard<Vec<Bytes>>,
    len: u64,
    chunk: usize,
    offset: usize,
}

impl LargeValue {
    pub fn size(&self) -> u64 {
        self.len
    }
}

impl Read for LargeValue {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            let Some(chunk) = self.chunks.get(self.chunk) else {
                break;
            };
            let remaining = &chunk[self.offset..];
            if remaining.is_empty() {
                self.chunk += 1;
                self.offset = 0;
                continue;
            }
            let n = remaining.len().min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&remaining[..n]);
            written += n;
            self.offset += n;
        }
        Ok(written)
    }
}

impl fmt::Debug for LargeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LargeValue")
            .field("len", &self.len)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

/// Value handed to the caller together with an entry's key.
#[derive(Debug)]
pub enum ValueProvider {
    Inline(Bytes),
    Large(LargeValue),
}

impl ValueProvider {
    pub fn is_large(&self) -> bool {
        matches!(self, ValueProvider::Large(_))
    }

    pub fn size(&self) -> u64 {
        match self {
            ValueProvider::Inline(bytes) => bytes.len() as u64,
            ValueProvider::Large(large) => large.size(),
        }
    }

    /// Read the whole value.
    pub fn into_bytes(self) -> Result<Bytes> {
        match self {
            ValueProvider::Inline(bytes) => Ok(bytes),
            ValueProvider::Large(mut large) => {
                let mut buf = BytesMut::zeroed(large.size() as usize);
                large
                    .read_exact(&mut buf)
                    .map_err(|e| Error::Storage(format!("large value read failed: {}", e)))?;
                Ok(buf.freeze())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_large_value_reads_across_chunks() -> Result<()> {
        let store = BlobStore::new(4);
        let value = Bytes::from_static(b"0123456789abcdef!");
        let value_ref = store.store(&value);
        assert!(value_ref.is_large());
        assert_eq!(value_ref.len(), 17);

        let ValueRef::Large { blob, len } = value_ref else {
            panic!("expected large value");
        };
        let mut large = store.open(blob, len).await?;

        // Odd-sized reads straddle chunk boundaries.
        let mut first = [0u8; 6];
        assert_eq!(large.read(&mut first).unwrap(), 6);
        assert_eq!(&first, b"012345");
        let mut rest = Vec::new();
        large.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"6789abcdef!");
        Ok(())
    }

    #[tokio::test]
    async fn test_providers_share_read_contract() -> Result<()> {
        let store = BlobStore::new(3);
        let value = Bytes::from_static(b"large enough value");
        let ValueRef::Large { blob, len } = store.store(&value) else {
            panic!("expected large value");
        };

        let inline = ValueProvider::Inline(value.clone());
        let large = ValueProvider::Large(store.open(blob, len).await?);
        assert!(!inline.is_large());
        assert!(large.is_large());
        assert_eq!(inline.size(), large.size());
        assert_eq!(inline.into_bytes()?, large.into_bytes()?);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_blob_is_corruption() {
        let store = BlobStore::new(8);
        let err = store.open(BlobId(42), 3).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_open_handle_survives_removal() -> Result<()> {
        let store = BlobStore::new(8);
        let value = Bytes::from_static(b"kept alive by the guard");
        let ValueRef::Large { blob, len } = store.store(&value) else {
            panic!("expected large value");
        };
        let handle = store.open(blob, len).await?;
        store.remove(blob);
        assert!(store.is_empty());
        assert_eq!(ValueProvider::Large(handle).into_bytes()?, value);
        Ok(())
    }
}
