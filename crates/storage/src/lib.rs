//! Storage layer for keymint.
//!
//! This crate provides the ordered key-value [`StorageBackend`] abstraction
//! and the two stores that keymint keeps in it:
//!
//! - the [`KeyVault`], an append-only timeline of encrypted signing keys
//! - the [`TriggerStore`], the cluster-shared state of the rotation schedule
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │          keymint-issuer (lifecycle, scheduler)       │
//! ├──────────────────────────┬───────────────────────────┤
//! │    KeyVault              │    TriggerStore           │
//! │    (insert, recent_n)    │    (load, create, replace)│
//! ├──────────────────────────┴───────────────────────────┤
//! │    StorageBackend (get, set, CAS, ranges, txn)       │
//! ├──────────────────────────────────────────────────────┤
//! │    MemoryBackend  │  shared database backends        │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use keymint_storage::{BackendKeyVault, KeyVault, MemoryBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let vault = BackendKeyVault::new(MemoryBackend::new());
//!     assert!(vault.most_recent().await?.is_none());
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: enables the `testutil` module with record builders and assertion macros.
//! - **`failpoints`**: activates the `fail` injection points inside [`MemoryBackend`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod keys;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod transaction;
pub mod trigger;

pub use backend::{KeyValue, StorageBackend};
pub use error::{BoxError, StorageError, StorageResult};
pub use keys::{BackendKeyVault, KeyVault, SigningKeyRecord};
pub use memory::MemoryBackend;
pub use transaction::Transaction;
pub use trigger::{BackendTriggerStore, TriggerRecord, TriggerStore};
