//! Issuer error types.
//!
//! [`IssuerError`] is what every public operation of this crate returns.
//! Cryptographic failures have their own [`CryptoError`] so callers can tell
//! a tampered record (never recoverable) from an unreachable store
//! (usually transient).

use keymint_storage::StorageError;
use thiserror::Error;

/// Failures of the symmetric and asymmetric primitives.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CryptoError {
    /// The symmetric secret is not a valid AES-256 key.
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required length in bytes.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// Ciphertext, nonce or secret did not authenticate.
    ///
    /// Deliberately carries no detail: which of the three was wrong is not
    /// observable from AES-GCM and must not be guessed at.
    #[error("Authentication failure while decrypting key material")]
    AuthenticationFailure,

    /// RSA key generation failed.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Key material could not be encoded or parsed.
    #[error("Key encoding error: {0}")]
    KeyEncoding(String),
}

/// Errors returned by the key lifecycle, scheduler and token pipeline.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IssuerError {
    /// The key vault or trigger store failed.
    #[error("Storage error: {0}")]
    Storage(#[source] StorageError),

    /// Encryption, decryption or key parsing failed.
    #[error("Cryptographic error: {0}")]
    Crypto(#[source] CryptoError),

    /// A new signing key could not be produced or persisted.
    ///
    /// No record exists for the attempted key.
    #[error("Signing key generation failed: {message}")]
    KeyGeneration {
        /// What went wrong.
        message: String,
        /// The failure that aborted generation.
        #[source]
        source: Box<IssuerError>,
    },

    /// A client-supplied claim name is not on the whitelist.
    #[error("Claim {claim} not white listed.")]
    InvalidClaim {
        /// The offending claim name, lowercased.
        claim: String,
    },

    /// The same claim name was supplied twice, differing only in case.
    #[error("Claim {claim} supplied more than once.")]
    DuplicateClaim {
        /// The colliding claim name, lowercased.
        claim: String,
    },

    /// A referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The token could not be encoded or signed.
    #[error("Token encoding failed: {0}")]
    TokenEncoding(#[source] jsonwebtoken::errors::Error),

    /// A token failed verification.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Configuration was rejected.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl IssuerError {
    /// Wraps `source` as a key generation failure.
    #[must_use]
    pub fn key_generation(message: impl Into<String>, source: impl Into<IssuerError>) -> Self {
        Self::KeyGeneration { message: message.into(), source: Box::new(source.into()) }
    }

    /// Creates an [`InvalidClaim`](Self::InvalidClaim) error.
    #[must_use]
    pub fn invalid_claim(claim: impl Into<String>) -> Self {
        Self::InvalidClaim { claim: claim.into() }
    }

    /// Creates an [`InvalidToken`](Self::InvalidToken) error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken(message.into())
    }

    /// Creates a [`Config`](Self::Config) error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns `true` when stored key material failed authentication.
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        match self {
            Self::Crypto(CryptoError::AuthenticationFailure) => true,
            Self::KeyGeneration { source, .. } => source.is_authentication_failure(),
            _ => false,
        }
    }
}

impl From<StorageError> for IssuerError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<CryptoError> for IssuerError {
    fn from(err: CryptoError) -> Self {
        Self::Crypto(err)
    }
}

/// Result type alias for issuer operations.
pub type Result<T> = std::result::Result<T, IssuerError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_invalid_claim_message_names_the_claim() {
        let err = IssuerError::invalid_claim("role");
        assert_eq!(err.to_string(), "Claim role not white listed.");
    }

    #[test]
    fn test_key_generation_keeps_source_chain() {
        let err = IssuerError::key_generation("persist failed", StorageError::connection("down"));

        let source = err.source().expect("source should be set");
        assert_eq!(source.to_string(), "Storage error: Connection error: down");
    }

    #[test]
    fn test_authentication_failure_detection() {
        assert!(IssuerError::from(CryptoError::AuthenticationFailure).is_authentication_failure());
        assert!(
            IssuerError::key_generation("open", CryptoError::AuthenticationFailure)
                .is_authentication_failure()
        );
        assert!(!IssuerError::from(StorageError::Conflict).is_authentication_failure());
    }

    #[test]
    fn test_crypto_error_display() {
        let err = CryptoError::InvalidKeyLength { expected: 32, actual: 16 };
        assert_eq!(err.to_string(), "Invalid key length: expected 32 bytes, got 16");
    }
}
