//! Shared test utilities for issuer testing.
//!
//! Feature-gated behind `testutil` so it never ships in production builds.
//!
//! ```toml
//! [dev-dependencies]
//! keymint-issuer = { path = "../issuer", features = ["testutil"] }
//! ```

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{Algorithm, Header};
use keymint_storage::{BackendKeyVault, BackendTriggerStore, MemoryBackend};
use serde_json::json;

use crate::{
    config::RotationConfig,
    crypto::{self, EncryptionSecret},
    lifecycle::KeyLifecycleManager,
    scheduler::RotationScheduler,
};

/// A valid 32-byte secret.
pub const TEST_SECRET: &str = "0123456789abcdef0123456789abcdef";

/// Issuer identifier used throughout the tests.
pub const TEST_ISSUER: &str = "https://issuer.keymint.test";

/// [`TEST_SECRET`] as an [`EncryptionSecret`].
#[must_use]
pub fn test_secret() -> EncryptionSecret {
    EncryptionSecret::from_utf8(TEST_SECRET).expect("test secret is 32 bytes")
}

/// One shared store and any number of instances over it, standing in for
/// several processes pointed at the same database.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    backend: MemoryBackend,
}

impl SharedStore {
    /// A fresh, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The key vault over this store.
    #[must_use]
    pub fn vault(&self) -> Arc<BackendKeyVault<MemoryBackend>> {
        Arc::new(BackendKeyVault::new(self.backend.clone()))
    }

    /// The trigger store over this store.
    #[must_use]
    pub fn triggers(&self) -> Arc<BackendTriggerStore<MemoryBackend>> {
        Arc::new(BackendTriggerStore::new(self.backend.clone()))
    }

    /// A new lifecycle manager, as a separate process would build it.
    #[must_use]
    pub fn lifecycle(&self) -> Arc<KeyLifecycleManager> {
        Arc::new(KeyLifecycleManager::new(self.vault(), test_secret()))
    }

    /// A new scheduler with its own lifecycle manager.
    #[must_use]
    pub fn scheduler(&self, instance_id: &str, config: RotationConfig) -> Arc<RotationScheduler> {
        let config = RotationConfig { instance_id: Some(instance_id.to_owned()), ..config };
        Arc::new(
            RotationScheduler::new(self.lifecycle(), self.triggers(), config)
                .expect("valid rotation config"),
        )
    }
}

/// Signs an otherwise valid token for [`TEST_ISSUER`] with a freshly generated
/// key that no vault has ever seen, claiming `kid` in the header.
#[must_use]
pub fn forge_token(kid: &str) -> String {
    let pair = crypto::generate_key_pair().expect("key generation");
    let private = crypto::parse_private_key(&pair.private_key_der).expect("parse generated key");
    let key = crypto::encoding_key(&private).expect("encoding key");

    let now = Utc::now().timestamp();
    let claims = json!({
        "iss": TEST_ISSUER,
        "sub": "mallory",
        "iat": now,
        "nbf": now,
        "exp": now + 600,
        "jti": "forged",
    });
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_owned());
    jsonwebtoken::encode(&header, &claims, &key).expect("encode forged token")
}
