//! JSON Web Key Set publishing and verification.
//!
//! The set is rebuilt from the vault on every call, so a rotation committed
//! by any instance shows up in the next document this one serves.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::{
    crypto,
    error::{IssuerError, Result},
    lifecycle::{KeyLifecycleManager, VerificationKey},
    token::TokenClaims,
};

/// Algorithms never accepted, whatever the key set contains.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Algorithms accepted on verification.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["RS256"];

/// One RSA public key in RFC 7517 form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always `RSA`.
    pub kty: String,
    /// Intended use, always `sig`.
    #[serde(rename = "use")]
    pub key_use: String,
    /// Signing algorithm, always `RS256`.
    pub alg: String,
    /// Key identifier.
    pub kid: String,
    /// Modulus, base64url without padding.
    pub n: String,
    /// Public exponent, base64url without padding.
    pub e: String,
}

impl From<&VerificationKey> for Jwk {
    fn from(key: &VerificationKey) -> Self {
        let (n, e) = crypto::rsa_components(&key.public_key);
        Self {
            kty: "RSA".to_owned(),
            key_use: "sig".to_owned(),
            alg: "RS256".to_owned(),
            kid: key.kid.clone(),
            n,
            e,
        }
    }
}

/// A key set document: `{"keys": [...]}`, newest key first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    /// The published keys.
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Looks up a key by `kid`.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

/// Renders the verification window as a [`JwkSet`].
#[derive(Debug)]
pub struct JwkPublisher {
    lifecycle: Arc<KeyLifecycleManager>,
    key_count: usize,
}

impl JwkPublisher {
    /// Publishes up to `key_count` keys.
    pub fn new(lifecycle: Arc<KeyLifecycleManager>, key_count: usize) -> Self {
        Self { lifecycle, key_count }
    }

    /// Builds the current key set.
    ///
    /// An empty vault is bootstrapped first, so the document always contains
    /// the key that the next token will be signed with.
    ///
    /// # Errors
    ///
    /// Any error of [`KeyLifecycleManager::verification_key_set`], or of
    /// [`KeyLifecycleManager::current_signing_key`] during bootstrap.
    #[tracing::instrument(skip(self))]
    pub async fn key_set(&self) -> Result<JwkSet> {
        let mut window = self.lifecycle.verification_key_set(self.key_count).await?;
        if window.is_empty() && self.key_count > 0 {
            self.lifecycle.current_signing_key().await?;
            window = self.lifecycle.verification_key_set(self.key_count).await?;
        }
        Ok(JwkSet { keys: window.iter().map(Jwk::from).collect() })
    }
}

/// Checks `alg` against [`FORBIDDEN_ALGORITHMS`] and [`ACCEPTED_ALGORITHMS`].
///
/// # Errors
///
/// [`IssuerError::InvalidToken`] for any algorithm other than RS256.
pub fn validate_algorithm(alg: &str) -> Result<()> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(IssuerError::invalid_token(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }
    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(IssuerError::invalid_token(format!(
            "Algorithm '{alg}' is not in accepted list (only RS256 is supported)"
        )));
    }
    Ok(())
}

/// Verifies `token` against the key in `key_set` whose `kid` matches the
/// token header, and checks expiry and issuer.
///
/// # Errors
///
/// [`IssuerError::InvalidToken`] if the token is malformed, names no `kid`
/// or an unknown one, uses another algorithm, is expired, has the wrong
/// issuer, or fails signature verification.
pub fn verify_with_key_set(token: &str, key_set: &JwkSet, issuer: &str) -> Result<TokenClaims> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| IssuerError::invalid_token(format!("malformed header: {e}")))?;
    validate_algorithm(&format!("{:?}", header.alg))?;

    let kid = header.kid.ok_or_else(|| IssuerError::invalid_token("header missing 'kid'"))?;
    let jwk = key_set
        .find(&kid)
        .ok_or_else(|| IssuerError::invalid_token(format!("no published key for kid {kid}")))?;

    let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
        .map_err(|e| IssuerError::invalid_token(format!("unusable key {kid}: {e}")))?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.validate_aud = false;
    validation.set_issuer(&[issuer]);

    let data = jsonwebtoken::decode::<TokenClaims>(token, &key, &validation)
        .map_err(|e| IssuerError::invalid_token(e.to_string()))?;
    Ok(data.claims)
}
