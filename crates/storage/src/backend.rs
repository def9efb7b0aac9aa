//! Storage backend trait definition.
//!
//! [`StorageBackend`] is the ordered key-value contract every keymint store
//! sits on. The signing-key vault and the rotation trigger store are both
//! written against it, so a deployment can swap the in-memory backend for a
//! shared one without touching the layers above.
//!
//! The contract is deliberately small:
//! - keys and values are bytes
//! - ranges iterate in byte order, in either direction
//! - compare-and-set is the only concurrency primitive
//! - transactions apply buffered writes and CAS checks atomically

use std::ops::RangeBounds;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::{error::StorageResult, transaction::Transaction};

/// Key-value pair returned from range queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// Abstract storage backend for key-value operations.
///
/// Backends must be thread-safe and linearizable per key: once a write has
/// returned, every later read from any clone observes it.
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](StorageBackend::get) | Retrieve a single value by key |
/// | [`set`](StorageBackend::set) | Store a key-value pair |
/// | [`compare_and_set`](StorageBackend::compare_and_set) | Atomic compare-and-swap |
/// | [`get_range`](StorageBackend::get_range) | Ordered scan, ascending |
/// | [`get_range_rev`](StorageBackend::get_range_rev) | Ordered scan, descending, bounded |
/// | [`transaction`](StorageBackend::transaction) | Begin an atomic transaction |
/// | [`health_check`](StorageBackend::health_check) | Verify backend availability |
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use keymint_storage::{MemoryBackend, StorageBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// backend.set(b"key".to_vec(), b"value".to_vec()).await.unwrap();
/// let value = backend.get(b"key").await.unwrap();
/// assert_eq!(value, Some(Bytes::from("value")));
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a value by key, or `None` when absent.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores a key-value pair, overwriting any existing value.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Atomically sets a key's value if it matches the expected current value.
    ///
    /// - `expected: None` is insert-if-absent. It fails with
    ///   [`Conflict`](crate::StorageError::Conflict) if any value is present.
    /// - `expected: Some(value)` is update-if-unchanged. It fails with
    ///   [`Conflict`](crate::StorageError::Conflict) unless the stored bytes are an exact
    ///   byte-for-byte match.
    ///
    /// Structured values must serialize deterministically for the comparison
    /// to be meaningful. Prefer [`compare_and_set_json`](Self::compare_and_set_json)
    /// with struct types.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict) when the precondition fails.
    #[must_use = "compare-and-set may fail with a conflict and errors must be handled"]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Typed wrapper around [`compare_and_set`](Self::compare_and_set).
    ///
    /// Both sides go through `serde_json`, which emits struct fields in
    /// declaration order, so a value read back and re-serialized compares
    /// equal to what was stored. Types containing a `HashMap` do not have
    /// this property.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Serialization`](crate::StorageError) if either value fails to encode.
    /// - [`StorageError::Conflict`](crate::StorageError) when the precondition fails.
    #[must_use = "compare-and-set may fail with a conflict and errors must be handled"]
    async fn compare_and_set_json<T>(
        &self,
        key: &[u8],
        expected: Option<&T>,
        new_value: &T,
    ) -> StorageResult<()>
    where
        T: Serialize + Send + Sync,
    {
        let expected_bytes = expected.map(serde_json::to_vec).transpose()?;
        let new_bytes = serde_json::to_vec(new_value)?;

        self.compare_and_set(key, expected_bytes.as_deref(), new_bytes).await
    }

    /// Retrieves all key-value pairs within a range, in ascending key order.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send;

    /// Retrieves at most `limit` key-value pairs within a range, in
    /// descending key order.
    ///
    /// With zero-padded, time-prefixed keys this yields newest-first results
    /// without materializing the whole range.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_range_rev<R>(&self, range: R, limit: usize) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send;

    /// Begins a new transaction.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>>;

    /// Verifies the backend can currently serve requests.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`](crate::StorageError::Connection) when the
    /// store is unreachable.
    #[must_use = "health check results indicate backend availability and must be inspected"]
    async fn health_check(&self) -> StorageResult<()>;
}
