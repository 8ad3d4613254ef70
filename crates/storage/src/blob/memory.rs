//! In-memory blob store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{BlobStore, lease_is_free, validate_name};
use crate::error::StoreError;

/// Blob store held in process memory.
///
/// Lease acquisition is atomic per name. Clones share the same contents.
/// The failure switches are for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<DashMap<String, Vec<u8>>>,
    leases: Arc<DashMap<String, DateTime<Utc>>>,
    fail_next_write: Arc<AtomicBool>,
    write_count: Arc<AtomicU32>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `write` fail.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Number of successful writes.
    #[must_use]
    pub fn write_count(&self) -> u32 {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Plant a lease tag directly.
    pub fn set_lease_tag(&self, name: &str, tag: DateTime<Utc>) {
        self.leases.insert(name.to_owned(), tag);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_name(name)?;
        Ok(self.blobs.get(name).map(|b| b.value().clone()))
    }

    async fn write(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        validate_name(name)?;
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("injected write failure on {name}")));
        }
        self.blobs.insert(name.to_owned(), data.to_vec());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        self.blobs.remove(name);
        Ok(())
    }

    async fn lease_tag(&self, name: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.leases.get(name).map(|t| *t.value()))
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        now: DateTime<Utc>,
        abandon_after: TimeDelta,
    ) -> Result<bool, StoreError> {
        validate_name(name)?;
        match self.leases.entry(name.to_owned()) {
            Entry::Vacant(entry) => {
                entry.insert(now);
                Ok(true)
            }
            Entry::Occupied(mut entry) => {
                if lease_is_free(Some(*entry.get()), now, abandon_after) {
                    entry.insert(now);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn release_lease(&self, name: &str, tag: DateTime<Utc>) -> Result<(), StoreError> {
        self.leases.remove_if(name, |_, current| *current == tag);
        Ok(())
    }
}
