//! RS256 access-token issuance.
//!
//! [`TokenSigner::issue`] filters the requested extension claims, selects the
//! current signing key and signs the token. Any failure aborts before token
//! bytes exist; a rejected claim never reaches the key vault.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use jsonwebtoken::{Algorithm, Header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    claims::ClaimWhitelist,
    error::{IssuerError, Result},
    lifecycle::KeyLifecycleManager,
};

/// The only token type this issuer hands out.
pub const BEARER: &str = "Bearer";

/// A client already authenticated by the external client directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedClient {
    /// Client identifier, becomes `sub`.
    pub client_id: String,
    /// Granted scopes, become the space-separated `scope` claim.
    pub scopes: Vec<String>,
    /// Per-client token lifetime overriding the default.
    pub token_ttl: Option<Duration>,
}

impl AuthenticatedClient {
    /// A client using the default token lifetime.
    pub fn new(
        client_id: impl Into<String>,
        scopes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
            token_ttl: None,
        }
    }

    /// Overrides the token lifetime for this client.
    #[must_use]
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = Some(ttl);
        self
    }
}

/// Input to [`TokenSigner::issue`].
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRequest {
    /// Issuer identifier written to `iss`.
    pub issuer: String,
    /// The authenticated caller.
    pub client: AuthenticatedClient,
    /// Requested extension claims, checked against the whitelist.
    pub extensions: Map<String, Value>,
}

impl TokenRequest {
    /// A request without extension claims.
    pub fn new(issuer: impl Into<String>, client: AuthenticatedClient) -> Self {
        Self { issuer: issuer.into(), client, extensions: Map::new() }
    }

    /// Adds a requested extension claim.
    #[must_use]
    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(name.into(), value.into());
        self
    }
}

/// Claims carried by every issued token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer.
    pub iss: String,
    /// Client id.
    pub sub: String,
    /// Issued at (Unix seconds).
    pub iat: i64,
    /// Not before (Unix seconds).
    pub nbf: i64,
    /// Expiry (Unix seconds).
    pub exp: i64,
    /// Unique token id.
    pub jti: String,
    /// Space-separated scopes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
    /// Whitelisted extension claims.
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

/// Token response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    /// The signed JWT.
    pub access_token: String,
    /// Always [`BEARER`].
    pub token_type: String,
    /// Seconds until expiry.
    pub expires_in: u64,
    /// Granted scopes, space-separated.
    pub scope: String,
    /// Key that signed the token. Not part of the response body.
    #[serde(skip)]
    pub kid: String,
}

/// Issues RS256 tokens signed with the current key.
#[derive(Debug)]
pub struct TokenSigner {
    lifecycle: Arc<KeyLifecycleManager>,
    whitelist: ClaimWhitelist,
    default_ttl: Duration,
}

impl TokenSigner {
    /// Creates a signer.
    pub fn new(
        lifecycle: Arc<KeyLifecycleManager>,
        whitelist: ClaimWhitelist,
        default_ttl: Duration,
    ) -> Self {
        Self { lifecycle, whitelist, default_ttl }
    }

    /// Issues a token for `request`.
    ///
    /// # Errors
    ///
    /// - [`IssuerError::InvalidClaim`] if an extension claim is not whitelisted
    /// - [`IssuerError::DuplicateClaim`] if two extension names differ only in case
    /// - [`IssuerError::InvalidToken`] if the issuer or client id is empty
    /// - any error of [`KeyLifecycleManager::current_signing_key`]
    /// - [`IssuerError::TokenEncoding`] if signing fails
    #[tracing::instrument(skip(self, request), fields(client_id = %request.client.client_id))]
    pub async fn issue(&self, request: &TokenRequest) -> Result<IssuedToken> {
        if request.issuer.is_empty() {
            return Err(IssuerError::invalid_token("issuer cannot be empty"));
        }
        if request.client.client_id.is_empty() {
            return Err(IssuerError::invalid_token("client_id cannot be empty"));
        }

        let extensions = self.whitelist.filter(&request.extensions)?;

        let key = self.lifecycle.current_signing_key().await?;

        let ttl = request.client.token_ttl.unwrap_or(self.default_ttl);
        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| IssuerError::config("token lifetime out of range"))?;
        let now = Utc::now().timestamp();
        let scope = request.client.scopes.join(" ");

        let claims = TokenClaims {
            iss: request.issuer.clone(),
            sub: request.client.client_id.clone(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(ttl_secs),
            jti: Uuid::new_v4().to_string(),
            scope: scope.clone(),
            extensions,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.kid().to_owned());
        let access_token = jsonwebtoken::encode(&header, &claims, key.encoding_key())
            .map_err(IssuerError::TokenEncoding)?;

        tracing::debug!(kid = %key.kid(), jti = %claims.jti, "issued access token");
        Ok(IssuedToken {
            access_token,
            token_type: BEARER.to_owned(),
            expires_in: ttl.as_secs(),
            scope,
            kid: key.kid().to_owned(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use keymint_storage::{BackendKeyVault, KeyVault, MemoryBackend};

    use super::*;
    use crate::crypto::EncryptionSecret;

    fn signer() -> (TokenSigner, Arc<BackendKeyVault<MemoryBackend>>) {
        let vault = Arc::new(BackendKeyVault::new(MemoryBackend::new()));
        let secret = EncryptionSecret::new(b"0123456789abcdef0123456789abcdef".to_vec()).unwrap();
        let lifecycle = Arc::new(KeyLifecycleManager::new(vault.clone(), secret));
        let whitelist = ClaimWhitelist::new(["team", "env"]).unwrap();
        (TokenSigner::new(lifecycle, whitelist, Duration::from_secs(1800)), vault)
    }

    fn request() -> TokenRequest {
        TokenRequest::new("https://issuer.test", AuthenticatedClient::new("svc-a", ["ALL"]))
    }

    #[tokio::test]
    async fn test_rejected_claim_never_touches_the_vault() {
        let (signer, vault) = signer();

        let err = signer.issue(&request().with_claim("role", "admin")).await.unwrap_err();

        assert!(matches!(err, IssuerError::InvalidClaim { ref claim } if claim == "role"));
        assert_eq!(vault.count().await.unwrap(), 0, "no key may be bootstrapped");
    }

    #[tokio::test]
    async fn test_token_response_shape() {
        let (signer, _) = signer();

        let issued = signer.issue(&request()).await.unwrap();

        assert_eq!(issued.token_type, "Bearer");
        assert_eq!(issued.expires_in, 1800);
        assert_eq!(issued.scope, "ALL");
        assert_eq!(issued.access_token.split('.').count(), 3);

        let header = jsonwebtoken::decode_header(&issued.access_token).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some(issued.kid.as_str()));

        let body = serde_json::to_value(&issued).unwrap();
        assert!(body.get("kid").is_none());
    }

    #[tokio::test]
    async fn test_client_ttl_overrides_default() {
        let (signer, _) = signer();
        let client =
            AuthenticatedClient::new("svc-b", ["ALL"]).with_token_ttl(Duration::from_secs(60));

        let issued = signer.issue(&TokenRequest::new("https://issuer.test", client)).await.unwrap();
        assert_eq!(issued.expires_in, 60);
    }

    #[tokio::test]
    async fn test_empty_client_id_rejected() {
        let (signer, _) = signer();
        let request =
            TokenRequest::new("https://issuer.test", AuthenticatedClient::new("", ["ALL"]));

        assert!(matches!(signer.issue(&request).await, Err(IssuerError::InvalidToken(_))));
    }
}
