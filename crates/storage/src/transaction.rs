//! Transaction trait for atomic storage operations.
//!
//! A [`Transaction`] buffers writes and compare-and-set preconditions; nothing
//! reaches the backend until [`commit`](Transaction::commit). At commit every
//! precondition is checked under the backend's write lock, and either all
//! buffered writes land or none do. Readers never observe a half-applied
//! transaction.
//!
//! # Example
//!
//! ```
//! use keymint_storage::{MemoryBackend, StorageBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//!
//! let mut txn = backend.transaction().await.unwrap();
//! txn.compare_and_set(b"index/a".to_vec(), None, b"record/a".to_vec()).unwrap();
//! txn.set(b"record/a".to_vec(), b"payload".to_vec());
//! txn.commit().await.unwrap();
//!
//! // A second insert of the same index entry conflicts and writes nothing.
//! let mut txn = backend.transaction().await.unwrap();
//! txn.compare_and_set(b"index/a".to_vec(), None, b"record/b".to_vec()).unwrap();
//! txn.set(b"record/b".to_vec(), b"payload".to_vec());
//! assert!(txn.commit().await.is_err());
//! assert!(backend.get(b"record/b").await.unwrap().is_none());
//! # });
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Transaction handle for atomic multi-operation commits.
///
/// Reads through [`get`](Transaction::get) see this transaction's own
/// pending writes first.
#[async_trait]
pub trait Transaction: Send {
    /// Gets a value, preferring writes buffered in this transaction.
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Buffers an unconditional write.
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Buffers a conditional write.
    ///
    /// The condition is evaluated at commit time, not here. `expected: None`
    /// requires the key to be absent when the transaction commits.
    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Commits all buffered operations atomically.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict) if any buffered
    ///   precondition fails; no write is applied in that case.
    /// - Other [`StorageError`](crate::StorageError) variants on backend failures.
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
