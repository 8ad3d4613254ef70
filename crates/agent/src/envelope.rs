//! Signed and encrypted envelope.
//!
//! The payload is serialized to JSON and sealed with AES-256-GCM, using the
//! message type as associated data. The signature is HMAC-SHA256 over a
//! SHA-256 digest of the created timestamp, originator, target, message type
//! and ciphertext. [`AgentMessageEnvelope::open`] checks the signature before
//! anything is decrypted.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AgentError;
use crate::keys::AgentKeys;
use crate::message::MessageType;

type HmacSha256 = Hmac<Sha256>;

/// Envelopes dated this far in the future are still accepted.
const CLOCK_SKEW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMessageEnvelope {
    pub created: DateTime<Utc>,
    pub originator: String,
    pub target: String,
    pub message_type: MessageType,
    /// Base64 nonce plus AES-GCM ciphertext.
    pub ciphertext: String,
    /// Hex HMAC-SHA256.
    pub signature: String,
}

/// What the receiving side expects of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenPolicy<'a> {
    pub expected_target: &'a str,
    pub expected_type: MessageType,
    /// Replay window measured from `created`.
    pub max_age: Duration,
}

impl AgentMessageEnvelope {
    /// Serialize, encrypt and sign `payload`.
    pub fn seal<T: Serialize>(
        keys: &AgentKeys,
        originator: impl Into<String>,
        target: impl Into<String>,
        message_type: MessageType,
        payload: &T,
        now: DateTime<Utc>,
    ) -> Result<Self, AgentError> {
        let plaintext = zeroize::Zeroizing::new(serde_json::to_vec(payload)?);
        let sealed = keys
            .encryption()
            .encrypt_with_aad(&plaintext, message_type.as_str().as_bytes())?;

        let mut envelope = Self {
            created: now,
            originator: originator.into(),
            target: target.into(),
            message_type,
            ciphertext: STANDARD.encode(sealed),
            signature: String::new(),
        };
        envelope.signature = hex::encode(envelope.mac(keys)?.finalize().into_bytes());
        Ok(envelope)
    }

    /// Check the signature only.
    pub fn verify(&self, keys: &AgentKeys) -> Result<(), AgentError> {
        let expected = hex::decode(&self.signature).map_err(|_| AgentError::SignatureMismatch)?;
        self.mac(keys)?
            .verify_slice(&expected)
            .map_err(|_| AgentError::SignatureMismatch)
    }

    /// Verify, check addressing and age, then decrypt and decode the payload.
    pub fn open<T: DeserializeOwned>(
        &self,
        keys: &AgentKeys,
        policy: &OpenPolicy<'_>,
        now: DateTime<Utc>,
    ) -> Result<T, AgentError> {
        self.verify(keys)?;

        if self.target != policy.expected_target {
            return Err(AgentError::WrongTarget {
                expected: policy.expected_target.to_owned(),
                actual: self.target.clone(),
            });
        }
        if self.message_type != policy.expected_type {
            return Err(AgentError::UnexpectedMessageType {
                expected: policy.expected_type,
                actual: self.message_type,
            });
        }
        self.check_age(policy.max_age, now)?;

        let sealed = STANDARD
            .decode(&self.ciphertext)
            .map_err(|e| AgentError::Malformed(format!("ciphertext is not base64: {e}")))?;
        let plaintext = zeroize::Zeroizing::new(
            keys.encryption()
                .decrypt_with_aad(&sealed, self.message_type.as_str().as_bytes())?,
        );
        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn check_age(&self, max_age: Duration, now: DateTime<Utc>) -> Result<(), AgentError> {
        let elapsed = now.signed_duration_since(self.created);
        let stale = match elapsed.to_std() {
            Ok(age) => (age > max_age).then_some(age),
            // dated in the future
            Err(_) => {
                let ahead = (-elapsed).to_std().unwrap_or(Duration::MAX);
                (ahead > CLOCK_SKEW).then_some(ahead)
            }
        };
        match stale {
            Some(age) => Err(AgentError::Stale { age, max_age }),
            None => Ok(()),
        }
    }

    fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.created.timestamp_micros().to_be_bytes());
        for field in [
            self.originator.as_bytes(),
            self.target.as_bytes(),
            self.message_type.as_str().as_bytes(),
            self.ciphertext.as_bytes(),
        ] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field);
        }
        hasher.finalize().into()
    }

    fn mac(&self, keys: &AgentKeys) -> Result<HmacSha256, AgentError> {
        let mut mac = HmacSha256::new_from_slice(keys.signing())
            .map_err(|e| AgentError::InvalidKey(e.to_string()))?;
        mac.update(&self.digest());
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        value: String,
    }

    fn ping() -> Ping {
        Ping {
            value: "hello".into(),
        }
    }

    fn policy() -> OpenPolicy<'static> {
        OpenPolicy {
            expected_target: "agent-1",
            expected_type: MessageType::ProviderExecutionRequest,
            max_age: Duration::from_secs(300),
        }
    }

    fn sealed(keys: &AgentKeys, now: DateTime<Utc>) -> AgentMessageEnvelope {
        AgentMessageEnvelope::seal(
            keys,
            "service",
            "agent-1",
            MessageType::ProviderExecutionRequest,
            &ping(),
            now,
        )
        .unwrap()
    }

    fn flip_ciphertext_bit(text: &str, byte: usize) -> String {
        let mut bytes = STANDARD.decode(text).unwrap();
        bytes[byte] ^= 0x01;
        STANDARD.encode(bytes)
    }

    fn flip_signature_bit(text: &str, byte: usize) -> String {
        let mut bytes = hex::decode(text).unwrap();
        bytes[byte] ^= 0x80;
        hex::encode(bytes)
    }

    #[test]
    fn sealed_envelope_verifies_and_opens() {
        let keys = AgentKeys::generate();
        let now = Utc::now();
        let envelope = sealed(&keys, now);

        envelope.verify(&keys).unwrap();
        let opened: Ping = envelope.open(&keys, &policy(), now).unwrap();
        assert_eq!(opened, ping());
        assert!(!envelope.ciphertext.contains("hello"));
    }

    #[test]
    fn ciphertext_tampering_fails_verification() {
        let keys = AgentKeys::generate();
        let envelope = sealed(&keys, Utc::now());
        let len = STANDARD.decode(&envelope.ciphertext).unwrap().len();
        for byte in [0, len / 2, len - 1] {
            let mut tampered = envelope.clone();
            tampered.ciphertext = flip_ciphertext_bit(&envelope.ciphertext, byte);
            assert_ne!(tampered.ciphertext, envelope.ciphertext);
            assert!(matches!(
                tampered.verify(&keys),
                Err(AgentError::SignatureMismatch)
            ));
        }
    }

    #[test]
    fn signature_tampering_fails_verification() {
        let keys = AgentKeys::generate();
        let envelope = sealed(&keys, Utc::now());
        let mut tampered = envelope.clone();
        tampered.signature = flip_signature_bit(&envelope.signature, 5);
        assert!(matches!(
            tampered.verify(&keys),
            Err(AgentError::SignatureMismatch)
        ));
    }

    #[test]
    fn header_fields_are_signed() {
        let keys = AgentKeys::generate();
        let envelope = sealed(&keys, Utc::now());

        let mut retargeted = envelope.clone();
        retargeted.target = "agent-2".into();
        assert!(retargeted.verify(&keys).is_err());

        let mut redated = envelope.clone();
        redated.created += chrono::Duration::seconds(1);
        assert!(redated.verify(&keys).is_err());

        let mut retyped = envelope;
        retyped.message_type = MessageType::ProviderExecutionResponse;
        assert!(retyped.verify(&keys).is_err());
    }

    #[test]
    fn other_keys_do_not_verify() {
        let envelope = sealed(&AgentKeys::generate(), Utc::now());
        assert!(matches!(
            envelope.verify(&AgentKeys::generate()),
            Err(AgentError::SignatureMismatch)
        ));
    }

    #[test]
    fn wrong_target_is_rejected() {
        let keys = AgentKeys::generate();
        let now = Utc::now();
        let envelope = sealed(&keys, now);
        let policy = OpenPolicy {
            expected_target: "agent-2",
            ..policy()
        };
        let err = envelope.open::<Ping>(&keys, &policy, now).unwrap_err();
        assert!(matches!(err, AgentError::WrongTarget { .. }));
        assert!(err.is_rejection());
    }

    #[test]
    fn wrong_message_type_is_rejected() {
        let keys = AgentKeys::generate();
        let now = Utc::now();
        let envelope = sealed(&keys, now);
        let policy = OpenPolicy {
            expected_type: MessageType::ProviderExecutionResponse,
            ..policy()
        };
        assert!(matches!(
            envelope.open::<Ping>(&keys, &policy, now),
            Err(AgentError::UnexpectedMessageType { .. })
        ));
    }

    #[rstest]
    #[case::old(-301, true)]
    #[case::fresh(-299, false)]
    #[case::slight_skew(10, false)]
    #[case::far_future(120, true)]
    fn age_window(#[case] offset_secs: i64, #[case] stale: bool) {
        let keys = AgentKeys::generate();
        let now = Utc::now();
        let envelope = sealed(&keys, now + chrono::Duration::seconds(offset_secs));
        let result = envelope.open::<Ping>(&keys, &policy(), now);
        assert_eq!(matches!(result, Err(AgentError::Stale { .. })), stale);
        if !stale {
            assert!(result.is_ok());
        }
    }

    #[test]
    fn tampering_is_caught_before_decryption() {
        let keys = AgentKeys::generate();
        let now = Utc::now();
        let mut envelope = sealed(&keys, now);
        envelope.ciphertext = "not base64 at all!".into();
        assert!(matches!(
            envelope.open::<Ping>(&keys, &policy(), now),
            Err(AgentError::SignatureMismatch)
        ));
    }
}
