//! Delivery of envelopes to an agent.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::envelope::AgentMessageEnvelope;
use crate::error::AgentError;
use crate::executor::AgentExecutor;

/// Sends a request envelope and waits for the response envelope.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn send(&self, envelope: AgentMessageEnvelope)
    -> Result<AgentMessageEnvelope, AgentError>;
}

/// Calls an executor directly.
#[derive(Debug, Clone)]
pub struct InProcessTransport {
    executor: Arc<AgentExecutor>,
}

impl InProcessTransport {
    pub fn new(executor: Arc<AgentExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl AgentTransport for InProcessTransport {
    async fn send(
        &self,
        envelope: AgentMessageEnvelope,
    ) -> Result<AgentMessageEnvelope, AgentError> {
        self.executor.handle(envelope).await
    }
}

type Reply = oneshot::Sender<Result<AgentMessageEnvelope, AgentError>>;

/// Queues envelopes to an executor running on its own task.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    requests: mpsc::Sender<(AgentMessageEnvelope, Reply)>,
}

impl ChannelTransport {
    /// Spawn the serving loop for `executor`.
    ///
    /// The loop ends once every transport clone is dropped. Each request is
    /// handled on its own task.
    pub fn spawn(executor: Arc<AgentExecutor>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<(AgentMessageEnvelope, Reply)>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some((envelope, reply)) = rx.recv().await {
                let executor = Arc::clone(&executor);
                tokio::spawn(async move {
                    let response = executor.handle(envelope).await;
                    // caller may have given up
                    let _ = reply.send(response);
                });
            }
            tracing::debug!(agent = %executor.name(), "agent channel closed");
        });
        (Self { requests: tx }, handle)
    }
}

#[async_trait]
impl AgentTransport for ChannelTransport {
    async fn send(
        &self,
        envelope: AgentMessageEnvelope,
    ) -> Result<AgentMessageEnvelope, AgentError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send((envelope, reply))
            .await
            .map_err(|_| AgentError::Transport {
                reason: "agent is not running".into(),
            })?;
        response.await.map_err(|_| AgentError::Transport {
            reason: "agent dropped the request".into(),
        })?
    }
}
