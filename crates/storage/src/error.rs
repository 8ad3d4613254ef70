//! Storage errors.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rekey_core::{EncryptionError, SecureEntryId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The lease on a collection could not be taken within the wait budget.
    #[error("could not acquire lease on '{collection}' within {waited:?}")]
    ConcurrencyTimeout {
        collection: String,
        waited: Duration,
    },

    #[error("{kind} {id} not found")]
    ObjectNotFound { kind: &'static str, id: String },

    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("invalid blob name: {0:?}")]
    InvalidName(String),

    #[error("secure entry crypto failure: {0}")]
    Crypto(#[from] EncryptionError),

    /// A secure entry was read after its expiry; it has been purged.
    #[error("secure entry {id} expired at {expiry}")]
    Expired {
        id: SecureEntryId,
        expiry: DateTime<Utc>,
    },
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::ObjectNotFound {
            kind,
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound { .. })
    }
}
