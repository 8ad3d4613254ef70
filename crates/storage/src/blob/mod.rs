//! Blob backend contract.
//!
//! A backend stores opaque blobs by name and keeps one optional lease tag per
//! name. The tag is a timestamp; a tag older than the abandon threshold is
//! treated as left behind by a crashed writer.

mod file;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::error::StoreError;

pub use file::FileBlobStore;
pub use memory::MemoryBlobStore;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a blob. `None` if it was never written.
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace a blob.
    async fn write(&self, name: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Remove a blob. Removing a missing blob succeeds.
    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Current lease tag on `name`.
    async fn lease_tag(&self, name: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Tag `name` with `now` if it is untagged or its tag is at least
    /// `abandon_after` old. Returns whether the tag was taken.
    async fn try_acquire_lease(
        &self,
        name: &str,
        now: DateTime<Utc>,
        abandon_after: TimeDelta,
    ) -> Result<bool, StoreError>;

    /// Clear the tag on `name` if it is still `tag`.
    async fn release_lease(&self, name: &str, tag: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Whether a lease tagged at `tag` may be taken at `now`.
pub(crate) fn lease_is_free(
    tag: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    abandon_after: TimeDelta,
) -> bool {
    match tag {
        None => true,
        Some(tag) => now - tag >= abandon_after,
    }
}

/// Blob names become file names, so only a safe alphabet is accepted.
pub(crate) fn validate_name(name: &str) -> Result<(), StoreError> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_owned()))
    }
}
