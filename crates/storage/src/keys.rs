//! Append-only persistence for signing-key records.
//!
//! The [`KeyVault`] trait is the only way signing keys reach durable storage.
//! It offers inserts and newest-first reads; there is no update or delete,
//! so a record once written stays exactly as written.
//!
//! # Layout
//!
//! [`BackendKeyVault`] lays records out in any [`StorageBackend`]:
//!
//! ```text
//! signing-keys/records/{created_at_nanos:020}/{id}  -> SigningKeyRecord (JSON)
//! signing-keys/ids/{id}                             -> record key (uniqueness index)
//! signing-keys/head                                 -> id of the last inserted record
//! ```
//!
//! Zero-padding the creation timestamp makes byte order equal creation
//! order, so "most recent N" is a bounded reverse range scan. Each insert
//! writes all three entries in one transaction.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use keymint_storage::{BackendKeyVault, KeyVault, MemoryBackend, SigningKeyRecord};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let vault = BackendKeyVault::new(MemoryBackend::new());
//! let record = SigningKeyRecord::new("kid-1", vec![1, 2, 3], vec![4, 5, 6], [7; 12], Utc::now());
//!
//! assert!(vault.insert_if_empty(&record).await.unwrap());
//! assert_eq!(vault.most_recent().await.unwrap().map(|r| r.id), Some("kid-1".to_owned()));
//! # });
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
};

const RECORDS_PREFIX: &str = "signing-keys/records/";
const IDS_PREFIX: &str = "signing-keys/ids/";
const HEAD_KEY: &str = "signing-keys/head";

/// Length of the AES-GCM nonce stored alongside each record.
pub const IV_LEN: usize = 12;

/// One generation of signing material, as persisted.
///
/// The private key never appears in clear: `encrypted_private_key` is the
/// AES-256-GCM ciphertext (with its authentication tag) of the PKCS#8
/// encoding, sealed under `iv`. `public_key` is the DER
/// SubjectPublicKeyInfo and is safe to publish.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigningKeyRecord {
    /// Unique, immutable key identifier; becomes the JWT `kid`.
    pub id: String,
    /// DER-encoded SubjectPublicKeyInfo.
    #[serde(with = "base64_bytes")]
    pub public_key: Vec<u8>,
    /// AES-256-GCM ciphertext of the PKCS#8 private key, tag appended.
    #[serde(with = "base64_bytes")]
    pub encrypted_private_key: Vec<u8>,
    /// Nonce used to seal `encrypted_private_key`.
    #[serde(with = "base64_iv")]
    pub iv: [u8; IV_LEN],
    /// Creation instant; orders the key timeline.
    pub created_at: DateTime<Utc>,
}

impl SigningKeyRecord {
    /// Assembles a record from already-sealed parts.
    pub fn new(
        id: impl Into<String>,
        public_key: Vec<u8>,
        encrypted_private_key: Vec<u8>,
        iv: [u8; IV_LEN],
        created_at: DateTime<Utc>,
    ) -> Self {
        Self { id: id.into(), public_key, encrypted_private_key, iv, created_at }
    }
}

impl std::fmt::Debug for SigningKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyRecord")
            .field("id", &self.id)
            .field("public_key_len", &self.public_key.len())
            .field("encrypted_private_key", &"[sealed]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub(super) fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

mod base64_iv {
    use serde::{Deserializer, Serializer, de::Error};

    use super::IV_LEN;

    pub(super) fn serialize<S>(iv: &[u8; IV_LEN], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::base64_bytes::serialize(iv, serializer)
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<[u8; IV_LEN], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = super::base64_bytes::deserialize(deserializer)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| D::Error::custom(format!("iv must be {IV_LEN} bytes, got {len}")))
    }
}

/// Append-only store of signing-key records.
///
/// Implementations must make every insert atomic: a reader sees either the
/// whole record or nothing.
#[async_trait]
pub trait KeyVault: Send + Sync {
    /// Persists a new record.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`] if a record with the same `id` exists.
    /// - Any other [`StorageError`] if the store is unreachable.
    async fn insert(&self, record: &SigningKeyRecord) -> StorageResult<()>;

    /// Persists `record` only if the vault has never held a record.
    ///
    /// Returns `Ok(false)` without writing anything when another writer got
    /// there first. This is the bootstrap guard: concurrent first callers
    /// produce exactly one initial key.
    async fn insert_if_empty(&self, record: &SigningKeyRecord) -> StorageResult<bool>;

    /// Returns the record with the greatest `created_at`, if any.
    async fn most_recent(&self) -> StorageResult<Option<SigningKeyRecord>> {
        Ok(self.recent_n(1).await?.into_iter().next())
    }

    /// Returns up to `n` records, newest first.
    async fn recent_n(&self, n: usize) -> StorageResult<Vec<SigningKeyRecord>>;

    /// Returns the total number of stored records.
    async fn count(&self) -> StorageResult<usize>;
}

/// [`KeyVault`] over any [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct BackendKeyVault<B> {
    backend: B,
}

impl<B: StorageBackend> BackendKeyVault<B> {
    /// Wraps `backend`. Clones of a shared backend see the same vault.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn record_key(record: &SigningKeyRecord) -> StorageResult<Vec<u8>> {
        let nanos = record
            .created_at
            .timestamp_nanos_opt()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| {
                StorageError::serialization(format!(
                    "created_at {} is outside the storable range",
                    record.created_at
                ))
            })?;
        Ok(format!("{RECORDS_PREFIX}{nanos:020}/{}", record.id).into_bytes())
    }

    fn id_key(id: &str) -> Vec<u8> {
        format!("{IDS_PREFIX}{id}").into_bytes()
    }

    fn records_range() -> std::ops::Range<Vec<u8>> {
        // '0' follows '/' in ASCII, so this bounds exactly the records prefix.
        let start = RECORDS_PREFIX.as_bytes().to_vec();
        let mut end = start.clone();
        if let Some(last) = end.last_mut() {
            *last += 1;
        }
        start..end
    }

    async fn write(&self, record: &SigningKeyRecord, bootstrap: bool) -> StorageResult<()> {
        if record.id.is_empty() || record.id.contains('/') {
            return Err(StorageError::internal(format!("invalid signing key id: {:?}", record.id)));
        }

        let record_key = Self::record_key(record)?;
        let payload = serde_json::to_vec(record)?;

        let mut txn = self.backend.transaction().await?;
        txn.compare_and_set(Self::id_key(&record.id), None, record_key.clone())?;
        if bootstrap {
            let head = record.id.as_bytes().to_vec();
            txn.compare_and_set(HEAD_KEY.as_bytes().to_vec(), None, head)?;
        } else {
            txn.set(HEAD_KEY.as_bytes().to_vec(), record.id.as_bytes().to_vec());
        }
        txn.set(record_key, payload);
        txn.commit().await
    }
}

#[async_trait]
impl<B: StorageBackend> KeyVault for BackendKeyVault<B> {
    #[tracing::instrument(skip(self, record), fields(kid = %record.id))]
    async fn insert(&self, record: &SigningKeyRecord) -> StorageResult<()> {
        self.write(record, false).await?;
        tracing::debug!("signing key record stored");
        Ok(())
    }

    #[tracing::instrument(skip(self, record), fields(kid = %record.id))]
    async fn insert_if_empty(&self, record: &SigningKeyRecord) -> StorageResult<bool> {
        match self.write(record, true).await {
            Ok(()) => Ok(true),
            Err(StorageError::Conflict) => {
                // The id index conflicts too on a genuine duplicate id; only
                // an occupied head means someone else bootstrapped.
                if self.backend.get(HEAD_KEY.as_bytes()).await?.is_none() {
                    return Err(StorageError::Conflict);
                }
                tracing::debug!("vault already bootstrapped by another writer");
                Ok(false)
            },
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn recent_n(&self, n: usize) -> StorageResult<Vec<SigningKeyRecord>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        self.backend
            .get_range_rev(Self::records_range(), n)
            .await?
            .iter()
            .map(|kv| serde_json::from_slice(&kv.value).map_err(StorageError::from))
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn count(&self) -> StorageResult<usize> {
        Ok(self.backend.get_range(Self::records_range()).await?.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::MemoryBackend;

    fn record_at(id: &str, secs: i64) -> SigningKeyRecord {
        let created_at = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        let iv = [secs as u8; IV_LEN];
        SigningKeyRecord::new(id, vec![0x30, 0x82], vec![0xAA; 48], iv, created_at)
    }

    #[tokio::test]
    async fn test_empty_vault() {
        let vault = BackendKeyVault::new(MemoryBackend::new());

        assert!(vault.most_recent().await.unwrap().is_none());
        assert!(vault.recent_n(5).await.unwrap().is_empty());
        assert_eq!(vault.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recent_n_is_newest_first_and_bounded() {
        let vault = BackendKeyVault::new(MemoryBackend::new());
        // Insert out of order; the timeline is defined by created_at.
        for (id, secs) in [("b", 20), ("a", 10), ("d", 40), ("c", 30)] {
            vault.insert(&record_at(id, secs)).await.unwrap();
        }

        let ids: Vec<_> = vault.recent_n(3).await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["d", "c", "b"]);

        let all = vault.recent_n(10).await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].created_at > w[1].created_at));
        assert_eq!(vault.most_recent().await.unwrap().unwrap().id, "d");
        assert!(vault.recent_n(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let vault = BackendKeyVault::new(MemoryBackend::new());
        vault.insert(&record_at("dup", 1)).await.unwrap();

        let result = vault.insert(&record_at("dup", 2)).await;
        crate::assert_conflict!(result);
        assert_eq!(vault.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_if_empty_only_once() {
        let vault = BackendKeyVault::new(MemoryBackend::new());

        assert!(vault.insert_if_empty(&record_at("first", 1)).await.unwrap());
        assert!(!vault.insert_if_empty(&record_at("second", 2)).await.unwrap());

        assert_eq!(vault.count().await.unwrap(), 1);
        assert_eq!(vault.most_recent().await.unwrap().unwrap().id, "first");
    }

    #[tokio::test]
    async fn test_insert_if_empty_after_regular_insert() {
        let vault = BackendKeyVault::new(MemoryBackend::new());
        vault.insert(&record_at("rotated", 1)).await.unwrap();

        assert!(!vault.insert_if_empty(&record_at("late", 2)).await.unwrap());
        assert_eq!(vault.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_round_trip_preserves_every_field() {
        let vault = BackendKeyVault::new(MemoryBackend::new());
        let mut record = record_at("rt", 5);
        record.created_at += Duration::nanoseconds(123_456_789);
        vault.insert(&record).await.unwrap();

        assert_eq!(vault.most_recent().await.unwrap().unwrap(), record);
    }

    #[tokio::test]
    async fn test_ids_with_separator_are_rejected() {
        let vault = BackendKeyVault::new(MemoryBackend::new());
        let err = vault.insert(&record_at("a/b", 1)).await.unwrap_err();
        assert!(matches!(err, StorageError::Internal { .. }));
    }

    #[test]
    fn test_debug_hides_ciphertext() {
        let rendered = format!("{:?}", record_at("dbg", 1));
        assert!(rendered.contains("[sealed]"));
        assert!(!rendered.contains("170"), "ciphertext bytes must not be printed: {rendered}");
    }

    #[test]
    fn test_iv_length_is_checked_on_decode() {
        let mut json = serde_json::to_value(record_at("iv", 1)).unwrap();
        json["iv"] = serde_json::Value::String("AAAA".to_owned());
        assert!(serde_json::from_value::<SigningKeyRecord>(json).is_err());
    }
}
