//! Shared keys between the service and an agent.

use std::fmt;

use rekey_core::EncryptionKey;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::AgentError;

const SIGNING_KEY_SIZE: usize = 32;

/// HMAC signing key plus AES-256-GCM payload key.
///
/// Both sides of a bridge hold the same pair.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AgentKeys {
    signing: [u8; SIGNING_KEY_SIZE],
    #[zeroize(skip)]
    encryption: EncryptionKey,
}

impl AgentKeys {
    /// Fresh random keys.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing: rand::random(),
            encryption: EncryptionKey::generate(),
        }
    }

    /// Keys from hex strings, 32 bytes each.
    pub fn from_hex(signing_hex: &str, encryption_hex: &str) -> Result<Self, AgentError> {
        let bytes = hex::decode(signing_hex.trim())
            .map_err(|e| AgentError::InvalidKey(format!("signing key: {e}")))?;
        let signing: [u8; SIGNING_KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            AgentError::InvalidKey(format!(
                "signing key must be {SIGNING_KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        let encryption = EncryptionKey::from_hex(encryption_hex.trim())
            .map_err(|e| AgentError::InvalidKey(format!("encryption key: {e}")))?;
        Ok(Self {
            signing,
            encryption,
        })
    }

    pub(crate) fn signing(&self) -> &[u8] {
        &self.signing
    }

    pub(crate) fn encryption(&self) -> &EncryptionKey {
        &self.encryption
    }
}

impl fmt::Debug for AgentKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AgentKeys([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_hex_checks_lengths() {
        let ok = AgentKeys::from_hex(&"11".repeat(32), &"22".repeat(32));
        assert!(ok.is_ok());
        assert!(matches!(
            AgentKeys::from_hex(&"11".repeat(16), &"22".repeat(32)),
            Err(AgentError::InvalidKey(_))
        ));
        assert!(matches!(
            AgentKeys::from_hex("zz", &"22".repeat(32)),
            Err(AgentError::InvalidKey(_))
        ));
    }

    #[test]
    fn debug_is_redacted() {
        assert_eq!(format!("{:?}", AgentKeys::generate()), "AgentKeys([REDACTED])");
    }
}
