//! Wiring of the issuer components from one [`IssuerConfig`].

use std::sync::Arc;

use chrono::Utc;
use keymint_storage::{KeyVault, TriggerStore};

use crate::{
    config::IssuerConfig,
    error::Result,
    jwks::{JwkPublisher, JwkSet},
    lifecycle::KeyLifecycleManager,
    metadata::ServerMetadata,
    scheduler::RotationScheduler,
    token::{IssuedToken, TokenRequest, TokenSigner},
};

/// One issuing instance: key lifecycle, rotation, key set and token signing
/// over a shared key vault and trigger store.
#[derive(Debug)]
pub struct IssuerService {
    lifecycle: Arc<KeyLifecycleManager>,
    scheduler: Arc<RotationScheduler>,
    publisher: JwkPublisher,
    signer: TokenSigner,
}

impl IssuerService {
    /// Builds every component from `config`.
    ///
    /// # Errors
    ///
    /// [`IssuerError::Config`](crate::IssuerError::Config) if `config` does
    /// not validate.
    pub fn new(
        config: &IssuerConfig,
        vault: Arc<dyn KeyVault>,
        triggers: Arc<dyn TriggerStore>,
    ) -> Result<Self> {
        config.validate()?;

        let lifecycle = Arc::new(KeyLifecycleManager::with_cache_ttl(
            vault,
            config.encryption_secret().clone(),
            config.key_cache_ttl(),
        ));
        let scheduler = Arc::new(RotationScheduler::new(
            Arc::clone(&lifecycle),
            triggers,
            config.rotation().clone(),
        )?);
        let publisher = JwkPublisher::new(Arc::clone(&lifecycle), config.published_key_count());
        let signer =
            TokenSigner::new(Arc::clone(&lifecycle), config.whitelist()?, config.default_token_ttl());

        Ok(Self { lifecycle, scheduler, publisher, signer })
    }

    /// Registers the rotation trigger and starts polling it.
    ///
    /// # Errors
    ///
    /// Any error of [`RotationScheduler::register`].
    pub async fn start(&self) -> Result<()> {
        self.scheduler.register(Utc::now()).await?;
        self.scheduler.start();
        Ok(())
    }

    /// Stops the rotation scheduler.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }

    /// Issues a token.
    ///
    /// # Errors
    ///
    /// See [`TokenSigner::issue`].
    pub async fn issue(&self, request: &TokenRequest) -> Result<IssuedToken> {
        self.signer.issue(request).await
    }

    /// Current key set document.
    ///
    /// # Errors
    ///
    /// See [`JwkPublisher::key_set`].
    pub async fn key_set(&self) -> Result<JwkSet> {
        self.publisher.key_set().await
    }

    /// Metadata document for `issuer`.
    #[must_use]
    pub fn metadata(&self, issuer: &str) -> ServerMetadata {
        ServerMetadata::new(issuer)
    }

    /// The key lifecycle manager.
    #[must_use]
    pub fn lifecycle(&self) -> &Arc<KeyLifecycleManager> {
        &self.lifecycle
    }

    /// The rotation scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<RotationScheduler> {
        &self.scheduler
    }
}
