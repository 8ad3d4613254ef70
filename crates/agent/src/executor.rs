//! Receiving side of the bridge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rekey_core::{Clock, to_delta};
use rekey_workflow::{LocalRunner, RunRequest, WorkflowRunner};
use uuid::Uuid;

use crate::envelope::{AgentMessageEnvelope, OpenPolicy};
use crate::error::AgentError;
use crate::keys::AgentKeys;
use crate::message::{
    ExecutionOutcome, MessageType, ProviderExecutionRequest, ProviderExecutionResponse,
};

/// Default replay window for incoming envelopes.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

/// Runs workflows on behalf of a remote service.
///
/// An incoming envelope is verified, decrypted, turned into fresh provider
/// instances and run; the attempt log goes back sealed to the originator.
/// Each request id is run at most once per originator while its envelope is
/// inside the replay window.
#[derive(Debug, Clone)]
pub struct AgentExecutor {
    name: String,
    keys: AgentKeys,
    runner: LocalRunner,
    clock: Arc<dyn Clock>,
    max_age: Duration,
    /// `(originator, request_id)` to the envelope's creation time.
    seen: Arc<Mutex<HashMap<(String, Uuid), DateTime<Utc>>>>,
}

impl AgentExecutor {
    pub fn new(
        name: impl Into<String>,
        keys: AgentKeys,
        runner: LocalRunner,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            keys,
            runner,
            clock,
            max_age: DEFAULT_MAX_AGE,
            seen: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle one request envelope and produce the sealed response.
    ///
    /// Envelope errors are returned as `Err`; nothing is sent back to an
    /// originator that could not be verified. A workflow that cannot start is
    /// answered with [`ExecutionOutcome::Rejected`].
    pub async fn handle(
        &self,
        envelope: AgentMessageEnvelope,
    ) -> Result<AgentMessageEnvelope, AgentError> {
        let policy = OpenPolicy {
            expected_target: &self.name,
            expected_type: MessageType::ProviderExecutionRequest,
            max_age: self.max_age,
        };
        let request: ProviderExecutionRequest =
            match envelope.open(&self.keys, &policy, self.clock.now()) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(
                        agent = %self.name,
                        originator = %envelope.originator,
                        error = %e,
                        "rejected envelope"
                    );
                    return Err(e);
                }
            };

        let request_id = request.request_id;
        if let Err(e) = self.remember(&envelope, request_id) {
            tracing::warn!(
                agent = %self.name,
                originator = %envelope.originator,
                %request_id,
                "rejected replayed request"
            );
            return Err(e);
        }
        let secret_id = request.secret.id;
        tracing::info!(agent = %self.name, %request_id, %secret_id, "executing rotation request");

        let run = RunRequest {
            secret: request.secret,
            resources: request.resources,
            credential: request.credential,
        };
        let outcome = match self.runner.run(run, None).await {
            Ok(attempt) => ExecutionOutcome::Completed { attempt },
            Err(e) => {
                tracing::warn!(%request_id, %secret_id, error = %e, "rotation request rejected");
                ExecutionOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        };

        AgentMessageEnvelope::seal(
            &self.keys,
            self.name.clone(),
            envelope.originator,
            MessageType::ProviderExecutionResponse,
            &ProviderExecutionResponse {
                request_id,
                outcome,
            },
            self.clock.now(),
        )
    }

    /// Record a verified request, refusing one already seen.
    ///
    /// Entries older than the replay window are dropped first; their envelopes
    /// no longer open.
    fn remember(
        &self,
        envelope: &AgentMessageEnvelope,
        request_id: Uuid,
    ) -> Result<(), AgentError> {
        let now = self.clock.now();
        let window = to_delta(self.max_age);
        let mut seen = self.seen.lock();
        seen.retain(|_, created| now.signed_duration_since(*created) <= window);

        let key = (envelope.originator.clone(), request_id);
        if seen.contains_key(&key) {
            return Err(AgentError::Replayed { request_id });
        }
        seen.insert(key, envelope.created);
        Ok(())
    }
}
