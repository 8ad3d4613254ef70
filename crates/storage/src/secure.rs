//! Encrypted, expiring storage for cached credentials.
//!
//! Each entry is its own blob named `secure-<id>`. The payload is sealed with
//! AES-256-GCM; the entry id and expiry are bound in as associated data, so a
//! sealed payload cannot be replayed under another id or a later expiry.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use rekey_core::{Clock, EncryptionKey, SecureEntryId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::blob::BlobStore;
use crate::error::StoreError;

/// Short-lived sealed storage.
#[async_trait]
pub trait SecureStorage: Send + Sync {
    /// Seal `plaintext` and keep it until `expiry`.
    async fn persist_bytes(
        &self,
        expiry: DateTime<Utc>,
        plaintext: &[u8],
    ) -> Result<SecureEntryId, StoreError>;

    /// Open an entry.
    ///
    /// A missing entry is [`StoreError::ObjectNotFound`]; an entry past its
    /// expiry is purged and reported as [`StoreError::Expired`].
    async fn retrieve_bytes(&self, id: SecureEntryId) -> Result<Vec<u8>, StoreError>;

    /// Remove an entry. Removing a missing entry succeeds.
    async fn destroy(&self, id: SecureEntryId) -> Result<(), StoreError>;
}

/// Typed helpers over [`SecureStorage`].
#[async_trait]
pub trait SecureStorageExt: SecureStorage {
    async fn persist<T>(&self, expiry: DateTime<Utc>, value: &T) -> Result<SecureEntryId, StoreError>
    where
        T: Serialize + Sync,
    {
        let bytes = Zeroizing::new(serde_json::to_vec(value)?);
        self.persist_bytes(expiry, &bytes).await
    }

    async fn retrieve<T>(&self, id: SecureEntryId) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Send,
    {
        let bytes = Zeroizing::new(self.retrieve_bytes(id).await?);
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl<S: SecureStorage + ?Sized> SecureStorageExt for S {}

#[derive(Serialize, Deserialize)]
struct SealedEntry {
    expiry: DateTime<Utc>,
    ciphertext: String,
}

fn blob_name(id: SecureEntryId) -> String {
    format!("secure-{id}")
}

fn associated_data(id: SecureEntryId, expiry: DateTime<Utc>) -> Vec<u8> {
    format!("{id}|{}", expiry.to_rfc3339_opts(SecondsFormat::Nanos, true)).into_bytes()
}

/// [`SecureStorage`] sealing entries with a process-held key.
pub struct EncryptedSecureStorage {
    blobs: Arc<dyn BlobStore>,
    key: EncryptionKey,
    clock: Arc<dyn Clock>,
}

impl EncryptedSecureStorage {
    pub fn new(blobs: Arc<dyn BlobStore>, key: EncryptionKey, clock: Arc<dyn Clock>) -> Self {
        Self { blobs, key, clock }
    }
}

impl fmt::Debug for EncryptedSecureStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedSecureStorage")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SecureStorage for EncryptedSecureStorage {
    async fn persist_bytes(
        &self,
        expiry: DateTime<Utc>,
        plaintext: &[u8],
    ) -> Result<SecureEntryId, StoreError> {
        let id = SecureEntryId::v4();
        let sealed = self
            .key
            .encrypt_with_aad(plaintext, &associated_data(id, expiry))?;
        let entry = SealedEntry {
            expiry,
            ciphertext: STANDARD.encode(sealed),
        };
        self.blobs
            .write(&blob_name(id), &serde_json::to_vec(&entry)?)
            .await?;
        tracing::debug!(entry = %id, %expiry, "persisted secure entry");
        Ok(id)
    }

    async fn retrieve_bytes(&self, id: SecureEntryId) -> Result<Vec<u8>, StoreError> {
        let name = blob_name(id);
        let raw = self
            .blobs
            .read(&name)
            .await?
            .ok_or_else(|| StoreError::not_found("secure entry", id))?;
        let entry: SealedEntry = serde_json::from_slice(&raw)?;

        if self.clock.now() >= entry.expiry {
            tracing::info!(entry = %id, expiry = %entry.expiry, "secure entry expired, purging");
            self.blobs.delete(&name).await?;
            return Err(StoreError::Expired {
                id,
                expiry: entry.expiry,
            });
        }

        let sealed = STANDARD
            .decode(entry.ciphertext.as_bytes())
            .map_err(|e| StoreError::Backend(format!("corrupt secure entry {id}: {e}")))?;
        Ok(self
            .key
            .decrypt_with_aad(&sealed, &associated_data(id, entry.expiry))?)
    }

    async fn destroy(&self, id: SecureEntryId) -> Result<(), StoreError> {
        self.blobs.delete(&blob_name(id)).await?;
        tracing::debug!(entry = %id, "destroyed secure entry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::blob::MemoryBlobStore;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;
    use rekey_core::ManualClock;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Token {
        value: String,
        principal: String,
    }

    fn storage(blobs: MemoryBlobStore, clock: ManualClock) -> EncryptedSecureStorage {
        EncryptedSecureStorage::new(Arc::new(blobs), EncryptionKey::generate(), Arc::new(clock))
    }

    #[tokio::test]
    async fn round_trip_typed_value() {
        let clock = ManualClock::default();
        let secure = storage(MemoryBlobStore::new(), clock.clone());
        let token = Token {
            value: "eyJ0eXAi".into(),
            principal: "admin@example.com".into(),
        };
        let id = secure
            .persist(clock.now() + TimeDelta::hours(1), &token)
            .await
            .unwrap();
        let back: Token = secure.retrieve(id).await.unwrap();
        assert_eq!(back, token);
    }

    #[tokio::test]
    async fn plaintext_never_reaches_the_blob() {
        let blobs = MemoryBlobStore::new();
        let clock = ManualClock::default();
        let secure = storage(blobs.clone(), clock.clone());
        let id = secure
            .persist_bytes(clock.now() + TimeDelta::hours(1), b"super-secret-token")
            .await
            .unwrap();
        let raw = blobs.read(&blob_name(id)).await.unwrap().unwrap();
        let text = String::from_utf8_lossy(&raw);
        assert!(!text.contains("super-secret-token"));
    }

    #[tokio::test]
    async fn expired_entry_is_purged() {
        let blobs = MemoryBlobStore::new();
        let clock = ManualClock::default();
        let secure = storage(blobs.clone(), clock.clone());
        let id = secure
            .persist_bytes(clock.now() + TimeDelta::minutes(5), b"t")
            .await
            .unwrap();

        clock.advance(Duration::from_secs(300));
        let err = secure.retrieve_bytes(id).await.unwrap_err();
        assert!(matches!(err, StoreError::Expired { id: e, .. } if e == id));
        assert!(blobs.read(&blob_name(id)).await.unwrap().is_none());
        assert!(secure.retrieve_bytes(id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn extended_expiry_fails_authentication() {
        let blobs = MemoryBlobStore::new();
        let clock = ManualClock::default();
        let secure = storage(blobs.clone(), clock.clone());
        let id = secure
            .persist_bytes(clock.now() + TimeDelta::minutes(5), b"t")
            .await
            .unwrap();

        let name = blob_name(id);
        let mut entry: SealedEntry =
            serde_json::from_slice(&blobs.read(&name).await.unwrap().unwrap()).unwrap();
        entry.expiry += TimeDelta::days(30);
        blobs
            .write(&name, &serde_json::to_vec(&entry).unwrap())
            .await
            .unwrap();

        assert!(matches!(
            secure.retrieve_bytes(id).await.unwrap_err(),
            StoreError::Crypto(_)
        ));
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let clock = ManualClock::default();
        let secure = storage(MemoryBlobStore::new(), clock.clone());
        let id = secure
            .persist_bytes(clock.now() + TimeDelta::hours(1), b"t")
            .await
            .unwrap();
        secure.destroy(id).await.unwrap();
        secure.destroy(id).await.unwrap();
        assert!(secure.retrieve_bytes(id).await.unwrap_err().is_not_found());
    }
}
