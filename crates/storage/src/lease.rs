//! Lease-coordinated read-modify-write.
//!
//! Protocol for every mutation of a collection:
//!
//! 1. Take the lease tag if it is absent or abandoned; otherwise back off for
//!    a jittered interval and try again.
//! 2. Read, modify and write the whole collection.
//! 3. Release the tag, whether or not step 2 failed.
//!
//! If the tag cannot be taken within `max_wait`, the mutation fails with
//! [`StoreError::ConcurrencyTimeout`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rekey_core::{Clock, to_delta};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::blob::BlobStore;
use crate::error::StoreError;

/// Timing policy for leases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeasePolicy {
    /// Age after which a tag is considered left behind.
    #[serde(with = "humantime_serde")]
    pub abandon_after: Duration,
    /// Shortest pause between attempts.
    #[serde(with = "humantime_serde")]
    pub backoff_min: Duration,
    /// Longest pause between attempts.
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
    /// Total time to keep trying.
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            abandon_after: Duration::from_secs(60),
            backoff_min: Duration::from_millis(50),
            backoff_max: Duration::from_millis(500),
            max_wait: Duration::from_secs(30),
        }
    }
}

/// Source of retry pauses.
pub trait Jitter: Send + Sync + fmt::Debug {
    /// A pause between `min` and `max`.
    fn backoff(&self, min: Duration, max: Duration) -> Duration;
}

/// Uniformly random pauses.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn backoff(&self, min: Duration, max: Duration) -> Duration {
        let lo = min.as_millis() as u64;
        let hi = max.as_millis().max(min.as_millis()) as u64;
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }
}

/// Always the same pause, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub Duration);

impl Jitter for FixedJitter {
    fn backoff(&self, _min: Duration, _max: Duration) -> Duration {
        self.0
    }
}

/// Serializes mutations of named collections on a [`BlobStore`].
#[derive(Clone)]
pub struct LeaseCoordinator {
    store: Arc<dyn BlobStore>,
    policy: LeasePolicy,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn Jitter>,
}

impl LeaseCoordinator {
    pub fn new(
        store: Arc<dyn BlobStore>,
        policy: LeasePolicy,
        clock: Arc<dyn Clock>,
        jitter: Arc<dyn Jitter>,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
            jitter,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    #[must_use]
    pub fn policy(&self) -> &LeasePolicy {
        &self.policy
    }

    /// Read `name` without taking the lease.
    pub async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.store.read(name).await
    }

    /// Run `f` over the current contents of `name` while holding its lease.
    ///
    /// `f` gets the current bytes and returns the bytes to write (`None` to
    /// leave the blob untouched) along with its result.
    pub async fn mutate<R, F>(&self, name: &str, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(Option<Vec<u8>>) -> Result<(Option<Vec<u8>>, R), StoreError> + Send,
        R: Send,
    {
        let tag = self.acquire(name).await?;

        let result = async {
            let current = self.store.read(name).await?;
            let (next, out) = f(current)?;
            if let Some(bytes) = next {
                self.store.write(name, &bytes).await?;
            }
            Ok(out)
        }
        .await;

        let released = self.store.release_lease(name, tag).await;
        match (result, released) {
            (Ok(out), Ok(())) => Ok(out),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                tracing::warn!(collection = name, error = %release_err, "failed to release lease after error");
                Err(e)
            }
        }
    }

    async fn acquire(&self, name: &str) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
        let started = Instant::now();
        let abandon_after = to_delta(self.policy.abandon_after);
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let now = self.clock.now();
            if self.store.try_acquire_lease(name, now, abandon_after).await? {
                if attempts > 1 {
                    tracing::debug!(collection = name, attempts, "lease acquired after waiting");
                }
                return Ok(now);
            }

            let waited = started.elapsed();
            if waited >= self.policy.max_wait {
                tracing::warn!(collection = name, attempts, ?waited, "lease wait budget exhausted");
                return Err(StoreError::ConcurrencyTimeout {
                    collection: name.to_owned(),
                    waited,
                });
            }
            let pause = self
                .jitter
                .backoff(self.policy.backoff_min, self.policy.backoff_max)
                .min(self.policy.max_wait - waited);
            tracing::trace!(collection = name, ?pause, "lease held, backing off");
            tokio::time::sleep(pause).await;
        }
    }
}

impl fmt::Debug for LeaseCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseCoordinator")
            .field("policy", &self.policy)
            .field("clock", &self.clock)
            .field("jitter", &self.jitter)
            .finish()
    }
}
