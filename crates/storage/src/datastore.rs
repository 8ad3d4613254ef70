//! The collections used by the rekeying service.

use std::sync::Arc;

use rekey_core::{Clock, ManagedSecret, RekeyingTask, Resource, SystemClock};

use crate::blob::{BlobStore, MemoryBlobStore};
use crate::entity::EntityStore;
use crate::lease::{Jitter, LeaseCoordinator, LeasePolicy, RandomJitter};

/// Managed secrets, resources and tasks over one blob store.
#[derive(Debug, Clone)]
pub struct Datastore {
    pub secrets: EntityStore<ManagedSecret>,
    pub resources: EntityStore<Resource>,
    pub tasks: EntityStore<RekeyingTask>,
}

impl Datastore {
    pub fn new(
        store: Arc<dyn BlobStore>,
        policy: LeasePolicy,
        clock: Arc<dyn Clock>,
        jitter: Arc<dyn Jitter>,
    ) -> Self {
        let lease = Arc::new(LeaseCoordinator::new(store, policy, clock, jitter));
        Self {
            secrets: EntityStore::new(Arc::clone(&lease)),
            resources: EntityStore::new(Arc::clone(&lease)),
            tasks: EntityStore::new(lease),
        }
    }

    /// A fresh in-memory datastore with default lease timing.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryBlobStore::new()),
            LeasePolicy::default(),
            Arc::new(SystemClock),
            Arc::new(RandomJitter),
        )
    }

    /// Resources referenced by `secret`, in its declared order.
    ///
    /// Unknown ids are reported as not found.
    pub async fn resources_for(
        &self,
        secret: &ManagedSecret,
    ) -> Result<Vec<Resource>, crate::StoreError> {
        let all = self.resources.list().await?;
        secret
            .resources
            .iter()
            .map(|id| {
                all.iter()
                    .find(|r| r.id == *id)
                    .cloned()
                    .ok_or_else(|| crate::StoreError::not_found("resource", id))
            })
            .collect()
    }

    /// Tasks belonging to `secret`.
    pub async fn tasks_for(
        &self,
        secret: &ManagedSecret,
    ) -> Result<Vec<RekeyingTask>, crate::StoreError> {
        Ok(self
            .tasks
            .list()
            .await?
            .into_iter()
            .filter(|t| t.managed_secret_id == secret.id)
            .collect())
    }
}
