//! [`WorkflowRunner`] that delegates to a remote agent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rekey_core::{Clock, WorkflowActionCollection};
use rekey_workflow::{RunRequest, WorkflowError, WorkflowRunner};
use tokio::sync::watch;

use crate::envelope::{AgentMessageEnvelope, OpenPolicy};
use crate::error::AgentError;
use crate::executor::DEFAULT_MAX_AGE;
use crate::keys::AgentKeys;
use crate::message::{
    ExecutionOutcome, MessageType, ProviderExecutionRequest, ProviderExecutionResponse,
};
use crate::transport::AgentTransport;

/// Seals each run as a request for `target` and waits for the attempt log.
///
/// Progress is not streamed; the final attempt is published once it arrives.
pub struct AgentRunner {
    originator: String,
    target: String,
    keys: AgentKeys,
    transport: Arc<dyn AgentTransport>,
    clock: Arc<dyn Clock>,
    max_age: Duration,
}

impl AgentRunner {
    pub fn new(
        originator: impl Into<String>,
        target: impl Into<String>,
        keys: AgentKeys,
        transport: Arc<dyn AgentTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            originator: originator.into(),
            target: target.into(),
            keys,
            transport,
            clock,
            max_age: DEFAULT_MAX_AGE,
        }
    }

    /// Replay window applied to responses.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    async fn exchange(
        &self,
        request: ProviderExecutionRequest,
    ) -> Result<ProviderExecutionResponse, AgentError> {
        let envelope = AgentMessageEnvelope::seal(
            &self.keys,
            self.originator.clone(),
            self.target.clone(),
            MessageType::ProviderExecutionRequest,
            &request,
            self.clock.now(),
        )?;
        let reply = self.transport.send(envelope).await?;

        if reply.originator != self.target {
            return Err(AgentError::Malformed(format!(
                "response came from '{}', expected '{}'",
                reply.originator, self.target
            )));
        }
        let policy = OpenPolicy {
            expected_target: &self.originator,
            expected_type: MessageType::ProviderExecutionResponse,
            max_age: self.max_age,
        };
        let response: ProviderExecutionResponse =
            reply.open(&self.keys, &policy, self.clock.now())?;
        if response.request_id != request.request_id {
            return Err(AgentError::Malformed(format!(
                "response is for request {}, expected {}",
                response.request_id, request.request_id
            )));
        }
        Ok(response)
    }
}

impl std::fmt::Debug for AgentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRunner")
            .field("originator", &self.originator)
            .field("target", &self.target)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl WorkflowRunner for AgentRunner {
    async fn run(
        &self,
        request: RunRequest,
        progress: Option<watch::Sender<WorkflowActionCollection>>,
    ) -> Result<WorkflowActionCollection, WorkflowError> {
        let secret_id = request.secret.id;
        let request =
            ProviderExecutionRequest::new(request.secret, request.resources, request.credential);
        tracing::debug!(
            %secret_id,
            request_id = %request.request_id,
            target = %self.target,
            "delegating rotation to agent"
        );

        let response = self.exchange(request).await.map_err(|e| {
            tracing::warn!(%secret_id, target = %self.target, error = %e, "agent exchange failed");
            WorkflowError::Runner {
                reason: e.to_string(),
            }
        })?;

        match response.outcome {
            ExecutionOutcome::Completed { attempt } => {
                if let Some(progress) = progress {
                    progress.send_replace(attempt.clone());
                }
                Ok(attempt)
            }
            ExecutionOutcome::Rejected { reason } => Err(WorkflowError::Runner {
                reason: format!("agent '{}' rejected the run: {reason}", self.target),
            }),
        }
    }
}
