//! Cryptographic primitives for signing-key material.
//!
//! - RSA-2048 key pairs with random UUID identifiers
//! - 96-bit nonces from the operating system CSPRNG
//! - AES-256-GCM sealing of private keys at rest (128-bit tag, no AAD)
//!
//! Private keys travel as PKCS#8 DER wrapped in [`Zeroizing`], public keys as
//! DER SubjectPublicKeyInfo. Nothing here touches storage.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::EncodingKey;
use keymint_storage::keys::IV_LEN;
use rand_core::{OsRng, RngCore};
use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs1::EncodeRsaPrivateKey,
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey},
    traits::PublicKeyParts,
};
use uuid::Uuid;
use zeroize::Zeroizing;

pub use crate::error::CryptoError;

/// Modulus size of generated signing keys.
pub const RSA_KEY_BITS: usize = 2048;

/// Required length of the AES-256 secret.
pub const SECRET_LEN: usize = 32;

/// Length of the AES-GCM nonce.
pub const NONCE_LEN: usize = IV_LEN;

/// The deployment-wide symmetric secret that seals private keys at rest.
///
/// Validated to exactly [`SECRET_LEN`] bytes at construction and zeroed on
/// drop. `Debug` never prints the bytes.
#[derive(Clone)]
pub struct EncryptionSecret(Zeroizing<Vec<u8>>);

impl EncryptionSecret {
    /// Wraps raw secret bytes.
    ///
    /// # Errors
    ///
    /// [`CryptoError::InvalidKeyLength`] unless `bytes` is exactly 32 bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(bytes.into());
        if bytes.len() != SECRET_LEN {
            return Err(CryptoError::InvalidKeyLength { expected: SECRET_LEN, actual: bytes.len() });
        }
        Ok(Self(bytes))
    }

    /// Uses the UTF-8 bytes of `secret` as the key, the form deployments
    /// usually configure it in.
    ///
    /// # Errors
    ///
    /// [`CryptoError::InvalidKeyLength`] unless `secret` is exactly 32 bytes long.
    pub fn from_utf8(secret: &str) -> Result<Self, CryptoError> {
        Self::new(secret.as_bytes().to_vec())
    }

    /// Returns the raw secret.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionSecret([REDACTED])")
    }
}

/// A freshly generated signing key pair.
pub struct GeneratedKeyPair {
    /// Random UUID v4, used as the JWT `kid`.
    pub id: String,
    /// DER SubjectPublicKeyInfo.
    pub public_key_der: Vec<u8>,
    /// PKCS#8 DER private key.
    pub private_key_der: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for GeneratedKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKeyPair")
            .field("id", &self.id)
            .field("private_key_der", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Generates an RSA-2048 key pair from the OS CSPRNG.
///
/// CPU-bound for tens to hundreds of milliseconds; async callers should run
/// it on a blocking thread.
///
/// # Errors
///
/// [`CryptoError::KeyGeneration`] if the RNG or prime search fails, or
/// [`CryptoError::KeyEncoding`] if the key cannot be serialized.
pub fn generate_key_pair() -> Result<GeneratedKeyPair, CryptoError> {
    let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

    let private_key_der = private
        .to_pkcs8_der()
        .map_err(|e| CryptoError::KeyEncoding(format!("PKCS#8 encoding failed: {e}")))?
        .to_bytes();
    let public_key_der = private
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| CryptoError::KeyEncoding(format!("SPKI encoding failed: {e}")))?
        .as_bytes()
        .to_vec();

    Ok(GeneratedKeyPair { id: Uuid::new_v4().to_string(), public_key_der, private_key_der })
}

/// Returns 12 fresh random bytes for use as an AES-GCM nonce.
#[must_use]
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

fn cipher(secret: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    if secret.len() != SECRET_LEN {
        return Err(CryptoError::InvalidKeyLength { expected: SECRET_LEN, actual: secret.len() });
    }
    Aes256Gcm::new_from_slice(secret)
        .map_err(|_| CryptoError::InvalidKeyLength { expected: SECRET_LEN, actual: secret.len() })
}

/// Seals `plaintext` under `secret` and `iv` with AES-256-GCM.
///
/// Returns the ciphertext with the 16-byte tag appended. An `iv` must never
/// be reused with the same secret.
///
/// # Errors
///
/// [`CryptoError::InvalidKeyLength`] unless `secret` is 32 bytes.
pub fn encrypt(
    plaintext: &[u8],
    secret: &[u8],
    iv: &[u8; NONCE_LEN],
) -> Result<Vec<u8>, CryptoError> {
    cipher(secret)?
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| CryptoError::KeyEncoding("plaintext too large for AES-GCM".to_owned()))
}

/// Opens a ciphertext produced by [`encrypt`].
///
/// # Errors
///
/// - [`CryptoError::InvalidKeyLength`] unless `secret` is 32 bytes.
/// - [`CryptoError::AuthenticationFailure`] if the ciphertext, tag, nonce or secret differ in any
///   bit from what sealed it. No plaintext is returned in that case.
pub fn decrypt(
    ciphertext: &[u8],
    secret: &[u8],
    iv: &[u8; NONCE_LEN],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    cipher(secret)?
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::AuthenticationFailure)
}

/// Parses a PKCS#8 DER private key.
///
/// # Errors
///
/// [`CryptoError::KeyEncoding`] if the bytes are not a PKCS#8 RSA key.
pub fn parse_private_key(pkcs8_der: &[u8]) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_pkcs8_der(pkcs8_der)
        .map_err(|e| CryptoError::KeyEncoding(format!("invalid PKCS#8 private key: {e}")))
}

/// Parses a DER SubjectPublicKeyInfo.
///
/// # Errors
///
/// [`CryptoError::KeyEncoding`] if the bytes are not an RSA public key.
pub fn parse_public_key(spki_der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| CryptoError::KeyEncoding(format!("invalid public key: {e}")))
}

/// Builds a `jsonwebtoken` RS256 signing key from a parsed private key.
///
/// # Errors
///
/// [`CryptoError::KeyEncoding`] if PKCS#1 re-encoding fails.
pub fn encoding_key(private: &RsaPrivateKey) -> Result<EncodingKey, CryptoError> {
    let pkcs1 = private
        .to_pkcs1_der()
        .map_err(|e| CryptoError::KeyEncoding(format!("PKCS#1 encoding failed: {e}")))?;
    Ok(EncodingKey::from_rsa_der(pkcs1.as_bytes()))
}

/// Returns the base64url (unpadded) big-endian modulus and exponent.
#[must_use]
pub fn rsa_components(public: &RsaPublicKey) -> (String, String) {
    (
        URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
        URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
    )
}
