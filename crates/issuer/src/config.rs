//! Configuration for the issuer.
//!
//! [`IssuerConfig`] is deserialized from the deployment's configuration
//! source or built in code through its validating builder. Durations use
//! humantime strings (`"30m"`, `"1s"`) except the two rotation timings, which
//! stay in milliseconds to match existing deployments.
//!
//! ```
//! use keymint_issuer::{IssuerConfig, RotationConfig};
//!
//! let config = IssuerConfig::builder()
//!     .encryption_secret("0123456789abcdef0123456789abcdef")
//!     .claim_whitelist(vec!["team".into(), "env".into()])
//!     .rotation(RotationConfig::builder().interval_ms(3_600_000).build())
//!     .build()?;
//! assert_eq!(config.published_key_count(), 5);
//! # Ok::<(), keymint_issuer::IssuerError>(())
//! ```

use std::{collections::BTreeSet, time::Duration};

use serde::{Deserialize, Deserializer};
use zeroize::Zeroizing;

use crate::{
    claims::ClaimWhitelist,
    crypto::EncryptionSecret,
    error::{IssuerError, Result},
    lifecycle::DEFAULT_KEY_CACHE_TTL,
};

/// Default delay between registering the rotation trigger and its first fire.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100_000;

/// Default rotation interval (one day).
pub const DEFAULT_ROTATION_INTERVAL_MS: u64 = 86_400_000;

/// Default number of keys published for verification.
pub const DEFAULT_PUBLISHED_KEY_COUNT: usize = 5;

/// Default lifetime of issued tokens.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Longest accepted rotation interval or initial delay (ten years).
pub const MAX_SCHEDULE_MS: u64 = 10 * 365 * 86_400_000;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_MISFIRE_THRESHOLD: Duration = Duration::from_secs(60);

/// Schedule of the cluster-wide rotation trigger.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RotationConfig {
    /// Delay before the first rotation after the trigger is registered.
    #[serde(default = "default_initial_delay_ms")]
    #[builder(default = DEFAULT_INITIAL_DELAY_MS)]
    pub initial_delay_ms: u64,

    /// Time between rotations.
    #[serde(default = "default_interval_ms")]
    #[builder(default = DEFAULT_ROTATION_INTERVAL_MS)]
    pub interval_ms: u64,

    /// A disabled schedule is registered paused.
    #[serde(default = "default_enabled")]
    #[builder(default = true)]
    pub enabled: bool,

    /// Repeats after the first fire; unbounded when absent.
    #[serde(default)]
    pub repeat_count: Option<u64>,

    /// How often each instance checks the shared trigger.
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    #[builder(default = DEFAULT_POLL_INTERVAL)]
    pub poll_interval: Duration,

    /// How late a fire may be before it counts as misfired.
    #[serde(with = "humantime_serde", default = "default_misfire_threshold")]
    #[builder(default = DEFAULT_MISFIRE_THRESHOLD)]
    pub misfire_threshold: Duration,

    /// Name this instance records when it claims a fire. A random UUID
    /// is used when absent.
    #[serde(default)]
    #[builder(into)]
    pub instance_id: Option<String>,
}

fn default_initial_delay_ms() -> u64 {
    DEFAULT_INITIAL_DELAY_MS
}

fn default_interval_ms() -> u64 {
    DEFAULT_ROTATION_INTERVAL_MS
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_misfire_threshold() -> Duration {
    DEFAULT_MISFIRE_THRESHOLD
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RotationConfig {
    /// Checks the schedule for values the scheduler cannot run with.
    ///
    /// # Errors
    ///
    /// [`IssuerError::Config`] if the interval or poll interval is zero, or
    /// the interval or initial delay exceeds [`MAX_SCHEDULE_MS`].
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(IssuerError::config("rotation interval_ms must be positive"));
        }
        if self.interval_ms > MAX_SCHEDULE_MS {
            return Err(IssuerError::config(format!(
                "rotation interval_ms cannot exceed {MAX_SCHEDULE_MS}"
            )));
        }
        if self.initial_delay_ms > MAX_SCHEDULE_MS {
            return Err(IssuerError::config(format!(
                "rotation initial_delay_ms cannot exceed {MAX_SCHEDULE_MS}"
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(IssuerError::config("rotation poll_interval must be positive"));
        }
        if self.instance_id.as_deref().is_some_and(str::is_empty) {
            return Err(IssuerError::config("rotation instance_id cannot be empty"));
        }
        Ok(())
    }
}

/// Everything an issuing instance needs besides its stores.
///
/// `Debug` never prints the encryption secret.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssuerConfig {
    #[serde(deserialize_with = "deserialize_secret")]
    pub(crate) encryption_secret: EncryptionSecret,

    #[serde(default = "default_published_key_count")]
    pub(crate) published_key_count: usize,

    #[serde(default)]
    pub(crate) rotation: RotationConfig,

    #[serde(default)]
    pub(crate) claim_whitelist: BTreeSet<String>,

    #[serde(with = "humantime_serde", default = "default_token_ttl")]
    pub(crate) default_token_ttl: Duration,

    #[serde(with = "humantime_serde", default = "default_key_cache_ttl")]
    pub(crate) key_cache_ttl: Duration,
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<EncryptionSecret, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Zeroizing::new(String::deserialize(deserializer)?);
    EncryptionSecret::from_utf8(&raw).map_err(serde::de::Error::custom)
}

fn default_published_key_count() -> usize {
    DEFAULT_PUBLISHED_KEY_COUNT
}

fn default_token_ttl() -> Duration {
    DEFAULT_TOKEN_TTL
}

fn default_key_cache_ttl() -> Duration {
    DEFAULT_KEY_CACHE_TTL
}

#[bon::bon]
impl IssuerConfig {
    /// Creates a configuration, validating every field.
    ///
    /// # Arguments
    ///
    /// * `encryption_secret` - 32-byte UTF-8 secret sealing private keys at rest.
    ///
    /// # Optional Fields
    ///
    /// * `published_key_count` - Keys in the verification window (default: 5).
    /// * `rotation` - Rotation schedule (default: [`RotationConfig::default`]).
    /// * `claim_whitelist` - Extension claim names clients may send (default: none).
    /// * `default_token_ttl` - Token lifetime when the client has none (default: 30 minutes).
    /// * `key_cache_ttl` - Lifetime of decrypted keys in memory (default: 5 minutes).
    ///
    /// # Errors
    ///
    /// Returns [`IssuerError::Config`] if:
    /// - The secret is not exactly 32 bytes
    /// - `published_key_count` or a duration is zero
    /// - A whitelisted name is empty or a registered claim name
    #[builder]
    pub fn new(
        #[builder(into)] encryption_secret: String,
        #[builder(default = DEFAULT_PUBLISHED_KEY_COUNT)] published_key_count: usize,
        #[builder(default)] rotation: RotationConfig,
        #[builder(default)] claim_whitelist: Vec<String>,
        #[builder(default = DEFAULT_TOKEN_TTL)] default_token_ttl: Duration,
        #[builder(default = DEFAULT_KEY_CACHE_TTL)] key_cache_ttl: Duration,
    ) -> Result<Self> {
        let encryption_secret = Zeroizing::new(encryption_secret);
        let encryption_secret = EncryptionSecret::from_utf8(&encryption_secret)
            .map_err(|e| IssuerError::config(format!("encryption_secret: {e}")))?;

        let config = Self {
            encryption_secret,
            published_key_count,
            rotation,
            claim_whitelist: claim_whitelist.into_iter().collect(),
            default_token_ttl,
            key_cache_ttl,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks a deserialized configuration.
    ///
    /// The builder runs this already.
    ///
    /// # Errors
    ///
    /// [`IssuerError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.published_key_count == 0 {
            return Err(IssuerError::config("published_key_count must be at least 1"));
        }
        if self.default_token_ttl.is_zero() {
            return Err(IssuerError::config("default_token_ttl must be positive"));
        }
        if self.key_cache_ttl.is_zero() {
            return Err(IssuerError::config("key_cache_ttl must be positive"));
        }
        self.rotation.validate()?;
        self.whitelist().map(drop)
    }

    /// The secret sealing private keys.
    #[must_use]
    pub fn encryption_secret(&self) -> &EncryptionSecret {
        &self.encryption_secret
    }

    /// Number of keys published for verification.
    #[must_use]
    pub fn published_key_count(&self) -> usize {
        self.published_key_count
    }

    /// Rotation schedule.
    #[must_use]
    pub fn rotation(&self) -> &RotationConfig {
        &self.rotation
    }

    /// Token lifetime for clients without their own.
    #[must_use]
    pub fn default_token_ttl(&self) -> Duration {
        self.default_token_ttl
    }

    /// Lifetime of decrypted keys in memory.
    #[must_use]
    pub fn key_cache_ttl(&self) -> Duration {
        self.key_cache_ttl
    }

    /// Builds the claim filter from the configured names.
    ///
    /// # Errors
    ///
    /// [`IssuerError::Config`] if a name is empty or reserved.
    pub fn whitelist(&self) -> Result<ClaimWhitelist> {
        ClaimWhitelist::new(self.claim_whitelist.iter())
    }
}
