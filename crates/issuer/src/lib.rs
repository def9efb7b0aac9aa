//! # keymint issuer
//!
//! Signing-key lifecycle and RS256 token issuance over a shared
//! [`keymint_storage`] store.
//!
//! This crate provides:
//! - **Key lifecycle**: lazy bootstrap, current key, verification window, rotation
//! - **Rotation scheduling**: cluster-wide periodic rotation that fires once per interval across
//!   all instances, with misfire recovery
//! - **Key set publishing**: RFC 7517 documents of the verification window
//! - **Token issuance**: whitelisted extension claims, RS256 signatures with `kid`
//!
//! Private keys are sealed with AES-256-GCM under a deployment secret before
//! they reach the store and exist in plaintext only in memory.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use keymint_issuer::{AuthenticatedClient, IssuerConfig, IssuerService, TokenRequest};
//! use keymint_storage::{BackendKeyVault, BackendTriggerStore, MemoryBackend};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = MemoryBackend::new();
//! let config = IssuerConfig::builder()
//!     .encryption_secret("0123456789abcdef0123456789abcdef")
//!     .claim_whitelist(vec!["team".into()])
//!     .build()?;
//!
//! let service = IssuerService::new(
//!     &config,
//!     Arc::new(BackendKeyVault::new(backend.clone())),
//!     Arc::new(BackendTriggerStore::new(backend)),
//! )?;
//! service.start().await?;
//!
//! let request = TokenRequest::new("https://issuer.example", AuthenticatedClient::new("svc", ["ALL"]))
//!     .with_claim("team", "payments");
//! let token = service.issue(&request).await?;
//! let jwks = service.key_set().await?;
//! assert!(jwks.find(&token.kid).is_some());
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - **`testutil`**: enables the `testutil` module with shared-store fixtures and token forgery.
//! - **`failpoints`**: activates the `fail` injection points in the lifecycle and the storage layer.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod claims;
pub mod config;
pub mod crypto;
pub mod error;
pub mod jwks;
pub mod lifecycle;
pub mod metadata;
pub mod scheduler;
pub mod service;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod token;

pub use claims::ClaimWhitelist;
pub use config::{IssuerConfig, RotationConfig};
pub use crypto::EncryptionSecret;
pub use error::{CryptoError, IssuerError, Result};
pub use jwks::{Jwk, JwkPublisher, JwkSet, verify_with_key_set};
pub use lifecycle::{ActiveSigningKey, KeyLifecycleManager, RotatedKey, VerificationKey};
pub use metadata::ServerMetadata;
pub use scheduler::{FireOutcome, RotationScheduler};
pub use service::IssuerService;
pub use token::{AuthenticatedClient, IssuedToken, TokenClaims, TokenRequest, TokenSigner};
