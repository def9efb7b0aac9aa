//! In-memory storage backend implementation.
//!
//! [`MemoryBackend`] keeps everything in a single [`BTreeMap`] behind a
//! [`parking_lot::RwLock`]. Clones share the map, which makes it a faithful
//! stand-in for a shared store in tests: several key lifecycle managers or
//! rotation schedulers built on clones of one backend contend exactly as
//! separate processes would against a real database.
//!
//! # Example
//!
//! ```
//! use keymint_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"greeting".to_vec(), b"hello".to_vec()).await.unwrap();
//!     let value = backend.get(b"greeting").await.unwrap();
//!
//!     assert_eq!(value.unwrap().as_ref(), b"hello");
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Sharing is limited to clones within one process

use std::{
    collections::BTreeMap,
    ops::{Bound, RangeBounds},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use parking_lot::RwLock;

use crate::{
    backend::{KeyValue, StorageBackend},
    error::{StorageError, StorageResult},
    transaction::Transaction,
};

type Map = BTreeMap<Vec<u8>, Bytes>;

/// In-memory storage backend using [`BTreeMap`].
///
/// Cheaply cloneable; all clones share the same underlying data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<Map>>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").field("entries", &self.data.read().len()).finish()
    }
}

impl MemoryBackend {
    /// Creates a new, empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` when nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

fn as_slice_bounds<R: RangeBounds<Vec<u8>>>(range: &R) -> (Bound<&[u8]>, Bound<&[u8]>) {
    let start = match range.start_bound() {
        Bound::Included(b) => Bound::Included(b.as_slice()),
        Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    };
    let end = match range.end_bound() {
        Bound::Included(b) => Bound::Included(b.as_slice()),
        Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    };
    (start, end)
}

fn precondition_holds(expected: Option<&[u8]>, current: Option<&Bytes>) -> bool {
    match (expected, current) {
        (None, None) => true,
        (Some(exp), Some(cur)) => exp == &cur[..],
        _ => false,
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(skip_all)]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        Ok(self.data.read().get(key).cloned())
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len(), value_len = value.len()))]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.data.write().insert(key, Bytes::from(value));
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        let mut data = self.data.write();

        if !precondition_holds(expected, data.get(key)) {
            return Err(StorageError::Conflict);
        }

        data.insert(key.to_vec(), Bytes::from(new_value));
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        let data = self.data.read();
        Ok(data
            .range::<[u8], _>(as_slice_bounds(&range))
            .map(|(k, v)| KeyValue::new(Bytes::copy_from_slice(k), v.clone()))
            .collect())
    }

    #[tracing::instrument(skip_all, fields(limit = limit))]
    async fn get_range_rev<R>(&self, range: R, limit: usize) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        let data = self.data.read();
        Ok(data
            .range::<[u8], _>(as_slice_bounds(&range))
            .rev()
            .take(limit)
            .map(|(k, v)| KeyValue::new(Bytes::copy_from_slice(k), v.clone()))
            .collect())
    }

    #[tracing::instrument(skip_all)]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction::new(self.clone())))
    }

    #[tracing::instrument(skip_all)]
    async fn health_check(&self) -> StorageResult<()> {
        fail_point!("memory-health-check", |_| {
            Err(StorageError::connection("injected health check failure"))
        });
        // Acquiring the lock proves the store is not wedged.
        let _unused = self.data.read();
        Ok(())
    }
}

/// A compare-and-set operation to be verified at commit time.
#[derive(Debug, Clone)]
struct CasOperation {
    key: Vec<u8>,
    expected: Option<Vec<u8>>,
    new_value: Vec<u8>,
}

/// In-memory transaction implementation.
struct MemoryTransaction {
    backend: MemoryBackend,
    pending_writes: BTreeMap<Vec<u8>, Vec<u8>>,
    pending_cas: Vec<CasOperation>,
}

impl MemoryTransaction {
    fn new(backend: MemoryBackend) -> Self {
        Self { backend, pending_writes: BTreeMap::new(), pending_cas: Vec::new() }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        if let Some(value) = self.pending_writes.get(key) {
            return Ok(Some(Bytes::copy_from_slice(value)));
        }
        if let Some(cas) = self.pending_cas.iter().rev().find(|cas| cas.key == key) {
            return Ok(Some(Bytes::copy_from_slice(&cas.new_value)));
        }
        self.backend.get(key).await
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending_writes.insert(key, value);
    }

    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        self.pending_cas.push(CasOperation { key, expected, new_value });
        Ok(())
    }

    #[tracing::instrument(
        skip_all,
        fields(writes = self.pending_writes.len(), preconditions = self.pending_cas.len())
    )]
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        fail_point!("memory-before-commit", |_| {
            Err(StorageError::connection("injected failure before commit"))
        });

        let mut data = self.backend.data.write();

        for cas in &self.pending_cas {
            if !precondition_holds(cas.expected.as_deref(), data.get(&cas.key)) {
                tracing::debug!("transaction precondition failed");
                return Err(StorageError::Conflict);
            }
        }

        for cas in self.pending_cas {
            data.insert(cas.key, Bytes::from(cas.new_value));
        }
        for (key, value) in self.pending_writes {
            data.insert(key, Bytes::from(value));
        }

        Ok(())
    }
}
