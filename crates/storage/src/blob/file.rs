//! Directory-backed blob store.
//!
//! Each blob is a file under the root directory; its lease tag is a sidecar
//! `<name>.lease` file holding an RFC 3339 timestamp.
//!
//! The sidecar only ever appears with its full content: it is written to a
//! scratch file and hard-linked into place, which fails if a lease already
//! exists. An abandoned sidecar is replaced in place by whichever writer
//! creates the takeover marker for that tag, so the path is never empty while
//! it changes hands. Release renames the sidecar away before checking it, and
//! puts back a tag that is not the caller's.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};

use super::{BlobStore, lease_is_free, validate_name};
use crate::error::StoreError;

const LEASE_SUFFIX: &str = ".lease";

#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        if name.ends_with(LEASE_SUFFIX) {
            return Err(StoreError::InvalidName(name.to_owned()));
        }
        Ok(self.root.join(name))
    }

    fn lease_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        let mut path = self.blob_path(name)?;
        path.set_file_name(format!("{name}{LEASE_SUFFIX}"));
        Ok(path)
    }

    /// Per-call scratch file. Blob names never start with a dot.
    fn scratch_path(&self, name: &str, kind: &str) -> PathBuf {
        self.root
            .join(format!(".{name}.{kind}.{:016x}", rand::random::<u64>()))
    }

    /// Atomically create the sidecar holding `now`. `false` if one exists.
    async fn create_lease(
        &self,
        name: &str,
        path: &Path,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let scratch = self.scratch_path(name, "lease");
        tokio::fs::write(&scratch, encode_tag(now)).await?;
        let linked = tokio::fs::hard_link(&scratch, path).await;
        remove_quietly(&scratch).await;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Move the sidecar to a private name. `None` if another writer got it first.
    async fn detach_lease(
        &self,
        name: &str,
        path: &Path,
    ) -> Result<Option<(PathBuf, Option<DateTime<Utc>>)>, StoreError> {
        let detached = self.scratch_path(name, "released");
        match tokio::fs::rename(path, &detached).await {
            Ok(()) => {
                let tag = read_tag(&detached).await?;
                Ok(Some((detached, tag)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the sidecar tagged `stale` with one holding `now`.
    ///
    /// Only the writer that creates the marker for `stale` may replace it.
    async fn take_over(
        &self,
        name: &str,
        path: &Path,
        stale: DateTime<Utc>,
        now: DateTime<Utc>,
        abandon_after: TimeDelta,
    ) -> Result<bool, StoreError> {
        let marker = self
            .root
            .join(format!(".{name}.takeover.{}", stale.timestamp_micros()));
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
            .await
        {
            Ok(file) => drop(file),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // left by a writer that died mid-takeover
                let orphaned = tokio::fs::metadata(&marker)
                    .await
                    .and_then(|m| m.modified())
                    .is_ok_and(|modified| {
                        lease_is_free(Some(DateTime::<Utc>::from(modified)), now, abandon_after)
                    });
                if orphaned {
                    remove_quietly(&marker).await;
                }
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        let replaced = self.replace_stale(name, path, stale, now).await;
        remove_quietly(&marker).await;
        replaced
    }

    async fn replace_stale(
        &self,
        name: &str,
        path: &Path,
        stale: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if read_tag(path).await? != Some(stale) {
            return Ok(false);
        }
        let scratch = self.scratch_path(name, "lease");
        tokio::fs::write(&scratch, encode_tag(now)).await?;
        if let Err(e) = tokio::fs::rename(&scratch, path).await {
            remove_quietly(&scratch).await;
            return Err(e.into());
        }
        Ok(true)
    }

    /// Put a detached sidecar back.
    async fn restore_lease(
        &self,
        name: &str,
        detached: &Path,
        path: &Path,
    ) -> Result<(), StoreError> {
        let linked = tokio::fs::hard_link(detached, path).await;
        remove_quietly(detached).await;
        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::warn!(blob = name, "lease was re-taken while detached");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn encode_tag(tag: DateTime<Utc>) -> String {
    tag.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

async fn read_tag(path: &Path) -> Result<Option<DateTime<Utc>>, StoreError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if let Ok(tag) = DateTime::parse_from_rfc3339(raw.trim()) {
        return Ok(Some(tag.with_timezone(&Utc)));
    }
    // Unreadable tag: age it by the file's modification time.
    let modified = tokio::fs::metadata(path).await?.modified()?;
    Ok(Some(DateTime::<Utc>::from(modified)))
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "could not remove scratch file");
        }
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.blob_path(name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.blob_path(name)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let staging = self.scratch_path(name, "tmp");
        tokio::fs::write(&staging, data).await?;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            remove_quietly(&staging).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.blob_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn lease_tag(&self, name: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        read_tag(&self.lease_path(name)?).await
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        now: DateTime<Utc>,
        abandon_after: TimeDelta,
    ) -> Result<bool, StoreError> {
        let path = self.lease_path(name)?;
        tokio::fs::create_dir_all(&self.root).await?;

        if self.create_lease(name, &path, now).await? {
            return Ok(true);
        }
        // Released in the meantime: back off and race for it again.
        let Some(tag) = read_tag(&path).await? else {
            return Ok(false);
        };
        if !lease_is_free(Some(tag), now, abandon_after) {
            return Ok(false);
        }

        if self.take_over(name, &path, tag, now, abandon_after).await? {
            tracing::warn!(blob = name, abandoned_at = %tag, "took over abandoned lease");
            return Ok(true);
        }
        Ok(false)
    }

    async fn release_lease(&self, name: &str, tag: DateTime<Utc>) -> Result<(), StoreError> {
        let path = self.lease_path(name)?;
        let Some((detached, held)) = self.detach_lease(name, &path).await? else {
            return Ok(());
        };
        if held == Some(tag) {
            remove_quietly(&detached).await;
            Ok(())
        } else {
            self.restore_lease(name, &detached, &path).await
        }
    }
}
