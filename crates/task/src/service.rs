//! Assembly of the executor and scanner from configuration.

use std::sync::Arc;

use rekey_core::{Clock, EncryptionKey, IdentityService};
use rekey_provider::ProviderRegistry;
use rekey_storage::{BlobStore, Datastore, EncryptedSecureStorage, RandomJitter};
use rekey_workflow::{LocalRunner, RotationWorkflow, WorkflowRunner};

use crate::config::RekeyConfig;
use crate::credentials::CredentialBroker;
use crate::events::EventDispatcher;
use crate::executor::{ExecutorSettings, TaskExecutor};
use crate::scanner::Scanner;

/// External collaborators the service is built around.
pub struct ServiceParts {
    pub blobs: Arc<dyn BlobStore>,
    pub identity: Arc<dyn IdentityService>,
    pub registry: Arc<ProviderRegistry>,
    pub events: Arc<dyn EventDispatcher>,
    pub clock: Arc<dyn Clock>,
    /// Key sealing cached credentials.
    pub storage_key: EncryptionKey,
    /// Runs workflows; in-process when `None`.
    pub runner: Option<Arc<dyn WorkflowRunner>>,
}

/// A configured executor and its scanner.
#[derive(Debug, Clone)]
pub struct RekeyService {
    executor: TaskExecutor,
    scanner: Scanner,
}

impl RekeyService {
    pub fn new(config: &RekeyConfig, parts: ServiceParts) -> Self {
        let datastore = Datastore::new(
            Arc::clone(&parts.blobs),
            config.lease.clone(),
            Arc::clone(&parts.clock),
            Arc::new(RandomJitter),
        );
        let secure = Arc::new(EncryptedSecureStorage::new(
            parts.blobs,
            parts.storage_key,
            Arc::clone(&parts.clock),
        ));
        let credentials = CredentialBroker::new(parts.identity, secure, Arc::clone(&parts.clock))
            .with_application_scopes(config.application_scopes.clone())
            .with_on_behalf_of_resource(config.on_behalf_of_resource.clone());
        let runner: Arc<dyn WorkflowRunner> = match parts.runner {
            Some(runner) => runner,
            None => Arc::new(LocalRunner::new(
                parts.registry,
                RotationWorkflow::new(config.workflow.clone(), Arc::clone(&parts.clock)),
            )),
        };

        let executor = TaskExecutor::new(datastore, runner, credentials, parts.events, parts.clock)
            .with_settings(ExecutorSettings::from(config));
        let scanner = Scanner::new(executor.clone(), config.scan_interval);
        Self { executor, scanner }
    }

    #[must_use]
    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    #[must_use]
    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }
}
