//! Seam between the task executor and whatever actually runs a workflow.

use std::sync::Arc;

use async_trait::async_trait;
use rekey_core::{AccessTokenCredential, ManagedSecret, Resource, WorkflowActionCollection};
use rekey_provider::ProviderRegistry;
use tokio::sync::watch;

use crate::engine::RotationWorkflow;
use crate::error::WorkflowError;

/// Everything needed to run one rotation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub secret: ManagedSecret,
    /// Resources in the secret's configured order.
    pub resources: Vec<Resource>,
    /// Credential handed to every provider instance.
    pub credential: AccessTokenCredential,
}

/// Runs a rotation somewhere: in process, or across an agent bridge.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    async fn run(
        &self,
        request: RunRequest,
        progress: Option<watch::Sender<WorkflowActionCollection>>,
    ) -> Result<WorkflowActionCollection, WorkflowError>;
}

/// Builds fresh provider instances from the registry and runs the engine in process.
#[derive(Debug, Clone)]
pub struct LocalRunner {
    registry: Arc<ProviderRegistry>,
    workflow: RotationWorkflow,
}

impl LocalRunner {
    pub fn new(registry: Arc<ProviderRegistry>, workflow: RotationWorkflow) -> Self {
        Self { registry, workflow }
    }

    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }
}

#[async_trait]
impl WorkflowRunner for LocalRunner {
    async fn run(
        &self,
        request: RunRequest,
        progress: Option<watch::Sender<WorkflowActionCollection>>,
    ) -> Result<WorkflowActionCollection, WorkflowError> {
        let providers = self
            .registry
            .create_all(&request.resources, &request.credential)?;
        tracing::debug!(
            secret_id = %request.secret.id,
            providers = providers.len(),
            "built provider instances"
        );
        self.workflow
            .run(&request.secret, &providers, progress.as_ref())
            .await
    }
}
