//! Signing-key lifecycle: bootstrap, current-key selection, verification
//! window and rotation.
//!
//! # Architecture
//!
//! ```text
//! current_signing_key()
//!   → vault.most_recent()            (always a fresh read)
//!   → empty? generate → seal → vault.insert_if_empty → re-read head
//!   → decrypted key cache (by kid)   (hit: reuse, miss: decrypt + verify)
//!
//! rotate()
//!   → generate → seal → vault.insert (one atomic record)
//! ```
//!
//! The head of the timeline is never cached. Only the decrypted form of a
//! given record is, and records are immutable, so a cached entry can never
//! hide a completed rotation. Decrypted keys outlive the call that opened
//! them by at most the cache TTL; [`KeyLifecycleManager::with_cache_ttl`]
//! shortens that bound.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use fail::fail_point;
use jsonwebtoken::EncodingKey;
use keymint_storage::{KeyVault, SigningKeyRecord};
use moka::future::Cache;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::{
    crypto::{self, CryptoError, EncryptionSecret},
    error::{IssuerError, Result},
};

/// Default lifetime of a decrypted key in the in-process cache.
pub const DEFAULT_KEY_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default maximum number of decrypted keys held in memory.
pub const DEFAULT_KEY_CACHE_CAPACITY: u64 = 64;

/// Decrypted signing material for the current head of the key timeline.
///
/// Lives only in memory. `Debug` prints the `kid` and nothing secret.
pub struct ActiveSigningKey {
    kid: String,
    created_at: DateTime<Utc>,
    public_key: RsaPublicKey,
    encoding_key: EncodingKey,
    // Held so the private key is zeroized together with this value.
    _private_key: RsaPrivateKey,
}

impl ActiveSigningKey {
    /// Key identifier, placed in the JWT header.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// When this key was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The public half.
    #[must_use]
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// RS256 signing key.
    #[must_use]
    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }
}

impl std::fmt::Debug for ActiveSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSigningKey")
            .field("kid", &self.kid)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Public material of one key in the verification window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationKey {
    /// Key identifier.
    pub kid: String,
    /// RSA public key.
    pub public_key: RsaPublicKey,
    /// When the key was created.
    pub created_at: DateTime<Utc>,
}

/// Outcome of a successful rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatedKey {
    /// Identifier of the newly persisted key.
    pub kid: String,
    /// Its creation instant.
    pub created_at: DateTime<Utc>,
}

/// Orchestrates the signing-key timeline stored in a [`KeyVault`].
///
/// Cheap to share behind an [`Arc`]; every method takes `&self`.
pub struct KeyLifecycleManager {
    vault: Arc<dyn KeyVault>,
    secret: EncryptionSecret,
    opened: Cache<String, Arc<ActiveSigningKey>>,
}

impl std::fmt::Debug for KeyLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLifecycleManager")
            .field("secret", &self.secret)
            .field("cached_keys", &self.opened.entry_count())
            .finish_non_exhaustive()
    }
}

impl KeyLifecycleManager {
    /// Creates a manager with the default decrypted-key cache TTL.
    pub fn new(vault: Arc<dyn KeyVault>, secret: EncryptionSecret) -> Self {
        Self::with_cache_ttl(vault, secret, DEFAULT_KEY_CACHE_TTL)
    }

    /// Creates a manager whose decrypted keys expire after `ttl`.
    pub fn with_cache_ttl(vault: Arc<dyn KeyVault>, secret: EncryptionSecret, ttl: Duration) -> Self {
        Self {
            vault,
            secret,
            opened: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(DEFAULT_KEY_CACHE_CAPACITY)
                .build(),
        }
    }

    /// Returns the decrypted most recent key, bootstrapping the vault if it
    /// has never held one.
    ///
    /// # Errors
    ///
    /// - [`IssuerError::KeyGeneration`] if bootstrap could not generate or persist a key. No record
    ///   is left behind.
    /// - [`IssuerError::Crypto`] with [`CryptoError::AuthenticationFailure`] if the head record does
    ///   not decrypt under the configured secret. There is no fallback to an older key.
    /// - [`IssuerError::Storage`] if the vault cannot be read.
    #[tracing::instrument(skip(self))]
    pub async fn current_signing_key(&self) -> Result<Arc<ActiveSigningKey>> {
        if let Some(head) = self.vault.most_recent().await? {
            return self.open(head).await;
        }

        self.bootstrap().await?;

        let head = self.vault.most_recent().await?.ok_or_else(|| {
            IssuerError::NotFound("no signing key present after bootstrap".to_owned())
        })?;
        self.open(head).await
    }

    /// Returns public material of up to `n` most recent keys, newest first.
    ///
    /// Never decrypts anything.
    ///
    /// # Errors
    ///
    /// [`IssuerError::Storage`] if the vault cannot be read, or
    /// [`IssuerError::Crypto`] if a stored public key does not parse.
    #[tracing::instrument(skip(self))]
    pub async fn verification_key_set(&self, n: usize) -> Result<Vec<VerificationKey>> {
        self.vault
            .recent_n(n)
            .await?
            .into_iter()
            .map(|record| {
                Ok(VerificationKey {
                    public_key: crypto::parse_public_key(&record.public_key)?,
                    kid: record.id,
                    created_at: record.created_at,
                })
            })
            .collect()
    }

    /// Generates, seals and persists a new key, which becomes current.
    ///
    /// Runs regardless of the vault's state. Failures are reported, never
    /// retried here.
    ///
    /// # Errors
    ///
    /// [`IssuerError::KeyGeneration`] wrapping whatever step failed; no record
    /// exists for the attempted key.
    #[tracing::instrument(skip(self))]
    pub async fn rotate(&self) -> Result<RotatedKey> {
        let previous = self
            .vault
            .most_recent()
            .await
            .map_err(|e| IssuerError::key_generation("failed to read the current key", e))?;

        let record = self
            .seal_new_key(previous.map(|r| r.created_at))
            .await
            .map_err(|e| IssuerError::key_generation("failed to produce a new key", e))?;

        before_persist()
            .map_err(|e| IssuerError::key_generation("failed to persist rotated key", e))?;
        self.vault
            .insert(&record)
            .await
            .map_err(|e| IssuerError::key_generation("failed to persist rotated key", e))?;

        tracing::info!(kid = %record.id, created_at = %record.created_at, "rotated signing key");
        Ok(RotatedKey { kid: record.id, created_at: record.created_at })
    }

    /// Number of decrypted keys currently cached.
    #[must_use]
    pub fn cached_key_count(&self) -> u64 {
        self.opened.entry_count()
    }

    async fn bootstrap(&self) -> Result<()> {
        let record = self
            .seal_new_key(None)
            .await
            .map_err(|e| IssuerError::key_generation("failed to produce the initial key", e))?;

        before_persist()
            .map_err(|e| IssuerError::key_generation("failed to persist the initial key", e))?;
        let won = self
            .vault
            .insert_if_empty(&record)
            .await
            .map_err(|e| IssuerError::key_generation("failed to persist the initial key", e))?;

        if won {
            tracing::info!(kid = %record.id, "bootstrapped initial signing key");
        } else {
            tracing::debug!(kid = %record.id, "another instance bootstrapped first; discarding key");
        }
        Ok(())
    }

    async fn seal_new_key(&self, previous: Option<DateTime<Utc>>) -> Result<SigningKeyRecord> {
        let pair = tokio::task::spawn_blocking(crypto::generate_key_pair).await.map_err(|e| {
            CryptoError::KeyGeneration(format!("key generation task failed: {e}"))
        })??;

        let iv = crypto::generate_nonce();
        let sealed = crypto::encrypt(&pair.private_key_der, self.secret.expose(), &iv)?;

        // Creation instants must be strictly increasing along the timeline.
        let mut created_at = Utc::now();
        if let Some(previous) = previous
            && created_at <= previous
        {
            created_at = previous + chrono::Duration::microseconds(1);
        }

        Ok(SigningKeyRecord::new(pair.id, pair.public_key_der, sealed, iv, created_at))
    }

    async fn open(&self, record: SigningKeyRecord) -> Result<Arc<ActiveSigningKey>> {
        if let Some(hit) = self.opened.get(&record.id).await {
            return Ok(hit);
        }

        let plaintext =
            crypto::decrypt(&record.encrypted_private_key, self.secret.expose(), &record.iv)
                .inspect_err(|e| {
                    tracing::error!(
                        kid = %record.id,
                        error = %e,
                        "stored signing key failed authentication; refusing to use it"
                    );
                })?;

        let private_key = crypto::parse_private_key(&plaintext)?;
        let public_key = crypto::parse_public_key(&record.public_key)?;
        if private_key.to_public_key() != public_key {
            tracing::error!(kid = %record.id, "stored public key does not match its private key");
            return Err(CryptoError::KeyEncoding(format!(
                "public and private halves of {} do not match",
                record.id
            ))
            .into());
        }

        let key = Arc::new(ActiveSigningKey {
            encoding_key: crypto::encoding_key(&private_key)?,
            kid: record.id,
            created_at: record.created_at,
            public_key,
            _private_key: private_key,
        });
        self.opened.insert(key.kid.clone(), Arc::clone(&key)).await;
        Ok(key)
    }
}

fn before_persist() -> Result<()> {
    fail_point!("lifecycle-before-persist", |_| {
        Err(keymint_storage::StorageError::connection(
            "injected failure before persisting a key",
        )
        .into())
    });
    Ok(())
}
