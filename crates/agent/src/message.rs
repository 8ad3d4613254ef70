//! Payloads carried inside an envelope.

use std::fmt;

use rekey_core::{AccessTokenCredential, ManagedSecret, Resource, WorkflowActionCollection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminates envelope payloads. Part of the signed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    ProviderExecutionRequest,
    ProviderExecutionResponse,
}

impl MessageType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProviderExecutionRequest => "provider_execution_request",
            Self::ProviderExecutionResponse => "provider_execution_response",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ask an agent to run one rotation.
///
/// The resources carry their provider types and configuration blobs; the
/// secret carries the requested valid period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderExecutionRequest {
    pub request_id: Uuid,
    pub secret: ManagedSecret,
    pub resources: Vec<Resource>,
    pub credential: AccessTokenCredential,
}

impl ProviderExecutionRequest {
    #[must_use]
    pub fn new(
        secret: ManagedSecret,
        resources: Vec<Resource>,
        credential: AccessTokenCredential,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            secret,
            resources,
            credential,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The workflow ran. Provider failures are inside the attempt log.
    Completed { attempt: WorkflowActionCollection },
    /// The workflow could not start on the agent.
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderExecutionResponse {
    pub request_id: Uuid,
    pub outcome: ExecutionOutcome,
}
