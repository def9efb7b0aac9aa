//! Extension-claim whitelist.
//!
//! Clients may ask for extra claims in their tokens. Only names configured in
//! the [`ClaimWhitelist`] pass, compared case-insensitively; the first name
//! that does not rejects the whole request before any key is touched.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::error::{IssuerError, Result};

/// Claim names the issuer sets itself. They can never be whitelisted.
pub const RESERVED_CLAIMS: &[&str] = &["iss", "sub", "aud", "exp", "iat", "nbf", "jti", "scope"];

/// The set of extension claim names clients may supply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimWhitelist {
    allowed: BTreeSet<String>,
}

impl ClaimWhitelist {
    /// Builds a whitelist from `names`, lowercasing each.
    ///
    /// # Errors
    ///
    /// [`IssuerError::Config`] if a name is empty or one of
    /// [`RESERVED_CLAIMS`].
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed = BTreeSet::new();
        for name in names {
            let name = name.as_ref().trim().to_lowercase();
            if name.is_empty() {
                return Err(IssuerError::config("whitelisted claim names cannot be empty"));
            }
            if RESERVED_CLAIMS.contains(&name.as_str()) {
                return Err(IssuerError::config(format!(
                    "claim {name} is set by the issuer and cannot be whitelisted"
                )));
            }
            allowed.insert(name);
        }
        Ok(Self { allowed })
    }

    /// Returns `true` if `name` is allowed, ignoring case.
    #[must_use]
    pub fn allows(&self, name: &str) -> bool {
        self.allowed.contains(&name.to_lowercase())
    }

    /// Iterates the allowed names in lowercase.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }

    /// Returns the claims with lowercased names if every name is allowed.
    ///
    /// # Errors
    ///
    /// - [`IssuerError::InvalidClaim`] naming the first claim that is not
    ///   whitelisted, in lowercase.
    /// - [`IssuerError::DuplicateClaim`] if two names differ only in case,
    ///   since they would collide in the token.
    pub fn filter(&self, extensions: &Map<String, Value>) -> Result<Map<String, Value>> {
        let mut accepted = Map::with_capacity(extensions.len());
        for (name, value) in extensions {
            let lowered = name.to_lowercase();
            if !self.allowed.contains(&lowered) {
                tracing::warn!(claim = %lowered, "rejected claim not on the whitelist");
                return Err(IssuerError::invalid_claim(lowered));
            }
            if accepted.contains_key(&lowered) {
                tracing::warn!(claim = %lowered, "rejected claim supplied twice");
                return Err(IssuerError::DuplicateClaim { claim: lowered });
            }
            accepted.insert(lowered, value.clone());
        }
        Ok(accepted)
    }
}
