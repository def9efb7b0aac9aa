//! Authorization server metadata document.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Base path of the OAuth 2.0 endpoints.
pub const API_V1: &str = "/api/v1/oauth2";

/// Token endpoint path.
pub const TOKEN_PATH: &str = "/api/v1/oauth2/token";

/// Key set endpoint path.
pub const JWK_SET_PATH: &str = "/api/v1/oauth2/jwk-set";

/// Metadata endpoint path.
pub const METADATA_PATH: &str = "/api/v1/oauth2/metadata";

/// Scopes a client can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Unrestricted access.
    #[serde(rename = "ALL")]
    All,
}

/// How clients authenticate at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationMethod {
    /// HTTP Basic with client id and secret.
    ClientSecretBasic,
    /// Client id and secret in the form body.
    ClientSecretPost,
}

/// Grants the token endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// RFC 6749 section 4.4.
    ClientCredentials,
}

/// Describes this issuer to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetadata {
    /// Issuer identifier.
    pub issuer: String,
    /// Where tokens are requested.
    pub token_endpoint: String,
    /// Where the key set is published.
    pub jwk_set_endpoint: String,
    /// Grantable scopes.
    pub scopes_supported: BTreeSet<Scope>,
    /// Token signing algorithms.
    pub token_endpoint_auth_signing_alg_values_supported: BTreeSet<String>,
    /// Client authentication methods.
    pub token_endpoint_auth_methods_supported: BTreeSet<AuthenticationMethod>,
    /// Supported grants.
    pub auth_grant_types_supported: BTreeSet<GrantType>,
}

impl ServerMetadata {
    /// Metadata for the issuer named `issuer`.
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            token_endpoint: TOKEN_PATH.to_owned(),
            jwk_set_endpoint: JWK_SET_PATH.to_owned(),
            scopes_supported: BTreeSet::from([Scope::All]),
            token_endpoint_auth_signing_alg_values_supported: BTreeSet::from(["RS256".to_owned()]),
            token_endpoint_auth_methods_supported: BTreeSet::from([
                AuthenticationMethod::ClientSecretBasic,
                AuthenticationMethod::ClientSecretPost,
            ]),
            auth_grant_types_supported: BTreeSet::from([GrantType::ClientCredentials]),
        }
    }
}
