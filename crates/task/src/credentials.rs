//! Credential acquisition per confirmation strategy.

use std::sync::Arc;

use rekey_core::{
    AccessTokenCredential, Clock, ConfirmationStrategy, IdentityService, PersistedCredential,
    RekeyingTask,
};
use rekey_storage::{SecureStorage, SecureStorageExt, StoreError};

use crate::error::TaskError;

/// Obtains the bearer credential a task runs with.
///
/// | Strategy | Source |
/// |---|---|
/// | `AdminSignsOffJustInTime` | live on-behalf-of exchange |
/// | `AdminCachesSignOff` | token cached in secure storage at approval |
/// | automatic, external signal | application credential |
#[derive(Clone)]
pub struct CredentialBroker {
    identity: Arc<dyn IdentityService>,
    secure: Arc<dyn SecureStorage>,
    clock: Arc<dyn Clock>,
    application_scopes: Vec<String>,
    on_behalf_of_resource: String,
}

impl std::fmt::Debug for CredentialBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBroker")
            .field("application_scopes", &self.application_scopes)
            .field("on_behalf_of_resource", &self.on_behalf_of_resource)
            .finish_non_exhaustive()
    }
}

impl CredentialBroker {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        secure: Arc<dyn SecureStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identity,
            secure,
            clock,
            application_scopes: Vec::new(),
            on_behalf_of_resource: "rekey".to_string(),
        }
    }

    pub fn with_application_scopes(mut self, scopes: Vec<String>) -> Self {
        self.application_scopes = scopes;
        self
    }

    pub fn with_on_behalf_of_resource(mut self, resource: impl Into<String>) -> Self {
        self.on_behalf_of_resource = resource.into();
        self
    }

    /// Credential for executing `task`, checked for a usable token.
    pub async fn acquire(&self, task: &RekeyingTask) -> Result<AccessTokenCredential, TaskError> {
        let credential = match task.confirmation {
            ConfirmationStrategy::AdminSignsOffJustInTime => {
                self.identity
                    .access_token_on_behalf_of_current_user(&self.on_behalf_of_resource)
                    .await?
            }
            ConfirmationStrategy::AdminCachesSignOff => self.retrieve_cached(task).await?,
            ConfirmationStrategy::AutomaticRekeyingAsNeeded
            | ConfirmationStrategy::AutomaticRekeyingScheduled
            | ConfirmationStrategy::ExternalSignal => {
                self.identity
                    .access_token_for_application(&self.application_scopes)
                    .await?
            }
        };

        if credential.is_blank() {
            return Err(TaskError::InvalidCredential { task_id: task.id });
        }
        if credential.is_expired_at(self.clock.now()) {
            return Err(TaskError::CredentialExpired { task_id: task.id });
        }
        tracing::debug!(
            task_id = %task.id,
            strategy = %task.confirmation,
            principal = %credential.principal,
            "acquired credential"
        );
        Ok(credential)
    }

    /// Exchange the approver's session now and keep the token until the task expires.
    pub async fn cache_sign_off(&self, task: &RekeyingTask) -> Result<PersistedCredential, TaskError> {
        let credential = self
            .identity
            .access_token_on_behalf_of_current_user(&self.on_behalf_of_resource)
            .await?;
        if credential.is_blank() {
            return Err(TaskError::InvalidCredential { task_id: task.id });
        }
        let owner = credential.principal.clone();
        let id = self.secure.persist(task.expiry, &credential).await?;
        tracing::info!(task_id = %task.id, owner = %owner, "cached sign-off credential");
        Ok(PersistedCredential { id, owner })
    }

    /// Drop a cached credential. Missing entries are fine.
    pub async fn destroy(&self, persisted: &PersistedCredential) -> Result<(), TaskError> {
        self.secure.destroy(persisted.id).await?;
        Ok(())
    }

    async fn retrieve_cached(&self, task: &RekeyingTask) -> Result<AccessTokenCredential, TaskError> {
        let Some(persisted) = &task.persisted_credential else {
            return Err(TaskError::CredentialNotFound { task_id: task.id });
        };
        match self.secure.retrieve::<AccessTokenCredential>(persisted.id).await {
            Ok(credential) => Ok(credential),
            Err(StoreError::ObjectNotFound { .. }) => {
                Err(TaskError::CredentialNotFound { task_id: task.id })
            }
            Err(StoreError::Expired { .. }) => Err(TaskError::CredentialExpired { task_id: task.id }),
            Err(other) => Err(other.into()),
        }
    }
}
