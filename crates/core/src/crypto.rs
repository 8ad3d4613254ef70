//! AES-256-GCM sealing for secret material at rest and in transit.
//!
//! Output layout is `nonce (12 bytes) || ciphertext || tag (16 bytes)`, with a
//! fresh random nonce per call.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload, rand_core::RngCore};
use aes_gcm::{Aes256Gcm, Nonce};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("ciphertext too short: minimum {minimum} bytes required, got {actual}")]
    CiphertextTooShort { minimum: usize, actual: usize },

    #[error("encryption failed")]
    EncryptionFailed,

    /// Wrong key, tampered ciphertext or mismatched associated data.
    #[error("decryption failed: authentication tag verification failed")]
    DecryptionFailed,

    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),
}

/// Symmetric key, zeroed on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Random key from the OS generator.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EncryptionError> {
        let key: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| EncryptionError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self { key })
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, EncryptionError> {
        let mut bytes =
            hex::decode(hex_str.trim()).map_err(|e| EncryptionError::InvalidHex(e.to_string()))?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Raw key bytes, for deriving other keys.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        self.encrypt_with_aad(plaintext, &[])
    }

    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        self.decrypt_with_aad(sealed, &[])
    }

    /// Encrypt, binding `aad` into the tag without encrypting it.
    pub fn encrypt_with_aad(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| EncryptionError::EncryptionFailed)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|_| EncryptionError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    /// Decrypt output of [`Self::encrypt_with_aad`]; `aad` must match.
    pub fn decrypt_with_aad(&self, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        const MIN_SIZE: usize = NONCE_SIZE + TAG_SIZE;
        if sealed.len() < MIN_SIZE {
            return Err(EncryptionError::CiphertextTooShort {
                minimum: MIN_SIZE,
                actual: sealed.len(),
            });
        }

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| EncryptionError::DecryptionFailed)?;
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| EncryptionError::DecryptionFailed)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey([REDACTED, {KEY_SIZE} bytes])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        assert_ne!(EncryptionKey::generate().key, EncryptionKey::generate().key);
    }

    #[test]
    fn wrong_length_rejected() {
        assert_eq!(
            EncryptionKey::from_bytes(&[0u8; 16]).unwrap_err(),
            EncryptionError::InvalidKeyLength {
                expected: 32,
                actual: 16
            }
        );
        assert!(matches!(
            EncryptionKey::from_hex("zz"),
            Err(EncryptionError::InvalidHex(_))
        ));
    }

    #[test]
    fn seal_and_open() {
        let key = EncryptionKey::from_bytes(&[7u8; KEY_SIZE]).unwrap();
        let sealed = key.encrypt(b"obo-token").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 9 + TAG_SIZE);
        assert_eq!(key.decrypt(&sealed).unwrap(), b"obo-token");
    }

    #[test]
    fn same_plaintext_gets_fresh_nonce() {
        let key = EncryptionKey::generate();
        assert_ne!(key.encrypt(b"x").unwrap(), key.encrypt(b"x").unwrap());
    }

    #[test]
    fn tampering_and_wrong_aad_fail() {
        let key = EncryptionKey::generate();
        let mut sealed = key.encrypt_with_aad(b"payload", b"entry-1").unwrap();
        assert_eq!(
            key.decrypt_with_aad(&sealed, b"entry-2").unwrap_err(),
            EncryptionError::DecryptionFailed
        );
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(
            key.decrypt_with_aad(&sealed, b"entry-1").unwrap_err(),
            EncryptionError::DecryptionFailed
        );
        assert!(matches!(
            key.decrypt(&[0u8; 10]),
            Err(EncryptionError::CiphertextTooShort { .. })
        ));
    }

    #[test]
    fn debug_redacts() {
        let key = EncryptionKey::generate();
        assert_eq!(format!("{key:?}"), "EncryptionKey([REDACTED, 32 bytes])");
        let hex = hex::encode(key.as_bytes());
        assert_eq!(EncryptionKey::from_hex(&hex).unwrap().as_bytes(), key.as_bytes());
    }
}
