//! Authenticated encryption for credential records at rest
//!
//! AES-256-GCM with a random 96-bit nonce per encryption. The master key is
//! 32 bytes, sourced from the caller or from the `HIVE_CREDENTIAL_KEY`
//! environment variable (base64), and is zeroized on drop. The envelope
//! carries `{version, nonce, tag, ciphertext}` so the format can evolve
//! without breaking existing files.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-GCM nonce length in bytes
const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes
const TAG_LEN: usize = 16;

/// Errors from the cryptographic envelope
///
/// Deliberately coarse: a failed decryption reveals nothing about whether
/// the key was wrong or the ciphertext was tampered with.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Encryption could not be performed
    #[error("encryption failed")]
    EncryptionFailed,

    /// Ciphertext could not be authenticated or decrypted
    #[error("decryption failed")]
    DecryptionFailed,

    /// Key material was malformed (wrong length, bad encoding)
    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// 256-bit master key, zeroized on drop and never persisted by this crate
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Environment variable consulted when no key is supplied explicitly
    pub const DEFAULT_ENV_VAR: &'static str = "HIVE_CREDENTIAL_KEY";

    /// Builds a key from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Decodes a base64-encoded 32-byte key
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] on bad encoding or wrong length.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("base64 decode failed: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("key must be exactly 32 bytes".into()))?;
        Ok(Self(bytes))
    }

    /// Generates a fresh random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Base64 encoding of the key, for deliberate export by the operator
    ///
    /// This is an exposure site; the result is the key.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey(***REDACTED***)")
    }
}

/// Authenticated-encryption envelope persisted by storage backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedData {
    /// Envelope format version
    pub version: u8,

    /// Per-encryption random nonce (12 bytes)
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,

    /// GCM authentication tag (16 bytes)
    #[serde(with = "b64")]
    pub tag: Vec<u8>,

    /// Ciphertext without the tag
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Version written by this build
    pub const CURRENT_VERSION: u8 = 1;
}

/// Encrypts `plaintext` under `key` with a fresh random nonce
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<EncryptedData, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::InvalidKey("key must be exactly 32 bytes".into()))?;

    let mut nonce = vec![0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;

    // aes-gcm appends the tag to the ciphertext; split it out for the envelope
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    Ok(EncryptedData {
        version: EncryptedData::CURRENT_VERSION,
        nonce,
        tag,
        ciphertext: sealed,
    })
}

/// Decrypts and authenticates an envelope
///
/// # Errors
///
/// Returns [`CryptoError::DecryptionFailed`] on wrong key, corruption, or
/// tampering; the failure mode is indistinguishable on purpose.
pub fn decrypt(key: &EncryptionKey, data: &EncryptedData) -> Result<Vec<u8>, CryptoError> {
    if data.version != EncryptedData::CURRENT_VERSION
        || data.nonce.len() != NONCE_LEN
        || data.tag.len() != TAG_LEN
    {
        return Err(CryptoError::DecryptionFailed);
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::InvalidKey("key must be exactly 32 bytes".into()))?;

    let mut sealed = Vec::with_capacity(data.ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(&data.ciphertext);
    sealed.extend_from_slice(&data.tag);

    cipher
        .decrypt(
            Nonce::from_slice(&data.nonce),
            Payload {
                msg: &sealed,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Base64 serde adapter for binary envelope fields
mod b64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = EncryptionKey::generate();
        let encrypted = encrypt(&key, b"my-api-key-12345").unwrap();

        assert_eq!(encrypted.version, EncryptedData::CURRENT_VERSION);
        assert_eq!(encrypted.nonce.len(), NONCE_LEN);
        assert_eq!(encrypted.tag.len(), TAG_LEN);
        assert!(!encrypted.ciphertext.is_empty());

        let decrypted = decrypt(&key, &encrypted).unwrap();
        assert_eq!(decrypted, b"my-api-key-12345");
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = encrypt(&EncryptionKey::generate(), b"secret data").unwrap();
        let result = decrypt(&EncryptionKey::generate(), &encrypted);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = EncryptionKey::generate();
        let mut encrypted = encrypt(&key, b"secret data").unwrap();
        encrypted.ciphertext[0] ^= 0xff;
        assert!(matches!(
            decrypt(&key, &encrypted),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = EncryptionKey::generate();
        let mut nonces = std::collections::HashSet::new();
        for _ in 0..100 {
            let encrypted = encrypt(&key, b"same plaintext").unwrap();
            assert!(nonces.insert(encrypted.nonce), "nonce collision detected");
        }
    }

    #[test]
    fn test_ciphertext_does_not_contain_plaintext() {
        let key = EncryptionKey::generate();
        let plaintext = b"BSA_very_secret_value_123456";
        let encrypted = encrypt(&key, plaintext).unwrap();
        assert!(
            !encrypted
                .ciphertext
                .windows(plaintext.len())
                .any(|w| w == plaintext)
        );
    }

    #[test]
    fn test_base64_key_round_trip() {
        let key = EncryptionKey::generate();
        let restored = EncryptionKey::from_base64(&key.to_base64()).unwrap();

        let encrypted = encrypt(&key, b"payload").unwrap();
        assert_eq!(decrypt(&restored, &encrypted).unwrap(), b"payload");
    }

    #[test]
    fn test_bad_key_material() {
        assert!(matches!(
            EncryptionKey::from_base64("not base64 at all!!"),
            Err(CryptoError::InvalidKey(_))
        ));
        // Valid base64, wrong length
        assert!(matches!(
            EncryptionKey::from_base64("c2hvcnQ="),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_key_debug_redacted() {
        let key = EncryptionKey::from_bytes([7u8; 32]);
        assert_eq!(format!("{key:?}"), "EncryptionKey(***REDACTED***)");
    }

    #[test]
    fn test_envelope_serde_round_trip() {
        let key = EncryptionKey::generate();
        let encrypted = encrypt(&key, b"payload").unwrap();
        let json = serde_json::to_string(&encrypted).unwrap();
        let back: EncryptedData = serde_json::from_str(&json).unwrap();
        assert_eq!(decrypt(&key, &back).unwrap(), b"payload");
    }
}
