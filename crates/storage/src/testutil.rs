//! Shared test utilities for storage testing.
//!
//! Feature-gated behind `testutil` so it never ships in production builds.
//!
//! ```toml
//! [dev-dependencies]
//! keymint-storage = { path = "../storage", features = ["testutil"] }
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::{
    BackendKeyVault, BackendTriggerStore, MemoryBackend,
    keys::{IV_LEN, SigningKeyRecord},
};

/// Fixed epoch that test timelines are measured from.
#[must_use]
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid fixed timestamp")
}

/// Builds a record with placeholder key material created `offset_secs`
/// after [`epoch`].
///
/// The byte fields are not real keys; use them only where nothing decrypts
/// or parses the record.
#[must_use]
pub fn placeholder_record(id: &str, offset_secs: i64) -> SigningKeyRecord {
    SigningKeyRecord::new(
        id,
        vec![0x30; 8],
        vec![0xCE; 32],
        [0x11; IV_LEN],
        epoch() + Duration::seconds(offset_secs),
    )
}

/// Builds a key vault and trigger store sharing one fresh [`MemoryBackend`],
/// mirroring a deployment where both live in the same database.
#[must_use]
pub fn shared_stores() -> (BackendKeyVault<MemoryBackend>, BackendTriggerStore<MemoryBackend>) {
    let backend = MemoryBackend::new();
    (BackendKeyVault::new(backend.clone()), BackendTriggerStore::new(backend))
}

/// Assert that a [`StorageResult`](crate::StorageResult) is a
/// [`StorageError::Conflict`](crate::StorageError::Conflict).
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::StorageError::Conflict)),
            "expected StorageError::Conflict, got: {:?}",
            $result
        )
    };
}
