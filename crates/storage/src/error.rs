//! Storage error types and result alias.
//!
//! Every backend maps its internal failures onto [`StorageError`], so the
//! key vault and trigger store above it can reason about a single taxonomy:
//!
//! - [`StorageError::Conflict`]: a compare-and-set precondition failed
//! - [`StorageError::Connection`]: the store could not be reached
//! - [`StorageError::Serialization`]: a persisted value could not be encoded or decoded
//! - [`StorageError::Internal`]: anything else the backend reports
//!
//! # Example
//!
//! ```
//! use keymint_storage::{StorageError, StorageResult};
//!
//! fn claim(stored: Option<&[u8]>) -> StorageResult<()> {
//!     match stored {
//!         Some(_) => Err(StorageError::Conflict),
//!         None => Ok(()),
//!     }
//! }
//!
//! assert!(claim(Some(b"taken".as_slice())).unwrap_err().is_conflict());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Variants carrying a `source` keep the underlying error reachable through
/// [`std::error::Error::source`].
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A compare-and-set precondition did not hold at commit time.
    ///
    /// Raised both for duplicate identifiers and for lost optimistic races.
    #[error("Transaction conflict")]
    Conflict,

    /// The backing store could not be reached.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Catch-all for backend failures without a better category.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },
}

impl StorageError {
    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Returns `true` for a failed compare-and-set precondition.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_with_source("invalid JSON payload", err)
    }
}
