//! Agent bridge errors.

use std::time::Duration;

use rekey_core::EncryptionError;
use thiserror::Error;
use uuid::Uuid;

use crate::message::MessageType;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The signature does not match the envelope contents.
    #[error("envelope signature does not verify")]
    SignatureMismatch,

    #[error("envelope is addressed to '{actual}', expected '{expected}'")]
    WrongTarget { expected: String, actual: String },

    /// Older than the replay window, or dated in the future beyond the skew allowance.
    #[error("envelope is {age:?} old, outside the {max_age:?} window")]
    Stale { age: Duration, max_age: Duration },

    /// A request id this agent has already run inside the replay window.
    #[error("request {request_id} was already received")]
    Replayed { request_id: Uuid },

    #[error("expected a {expected} message, got {actual}")]
    UnexpectedMessageType {
        expected: MessageType,
        actual: MessageType,
    },

    #[error("envelope payload could not be decrypted: {0}")]
    Decryption(#[from] EncryptionError),

    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid agent key: {0}")]
    InvalidKey(String),

    #[error("agent transport failed: {reason}")]
    Transport { reason: String },
}

impl AgentError {
    /// `true` when the envelope itself was rejected by verification.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::SignatureMismatch
                | Self::WrongTarget { .. }
                | Self::Stale { .. }
                | Self::Replayed { .. }
                | Self::UnexpectedMessageType { .. }
        )
    }
}
