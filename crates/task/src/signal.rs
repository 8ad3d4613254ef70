//! External-signal endpoint.
//!
//! A caller holding a secret's nonce asks for a rotation. The caller's wait is
//! bounded; the rotation itself is not, and keeps running after the caller has
//! been told to retry.

use rekey_core::{ConfirmationStrategies, ConfirmationStrategy, ManagedSecretId, TaskState};
use rekey_storage::Insert;

use crate::error::TaskError;
use crate::executor::TaskExecutor;

/// Answer to an external signal, with its wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalOutcome {
    /// `0`: the secret is not close enough to expiry.
    NoChangeNeeded,
    /// `1`: the secret was rotated within the bound.
    Rotated,
    /// `2`: a rotation is running; ask again shortly.
    Accepted,
}

impl SignalOutcome {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::NoChangeNeeded => 0,
            Self::Rotated => 1,
            Self::Accepted => 2,
        }
    }
}

impl TaskExecutor {
    /// Handle a rotation request for `secret_id` authenticated by `nonce`.
    ///
    /// Unknown secrets, secrets without the external-signal strategy and wrong
    /// nonces are client errors. A secret that already has an open task gets
    /// [`SignalOutcome::Accepted`] and no new task. A rotation that finishes inside the bound but
    /// fails is reported as [`TaskError::RotationFailed`].
    pub async fn external_signal(
        &self,
        secret_id: ManagedSecretId,
        nonce: &str,
    ) -> Result<SignalOutcome, TaskError> {
        let secret = self.datastore().secrets.get(secret_id).await?;
        if !secret
            .confirmations
            .contains(ConfirmationStrategies::EXTERNAL_SIGNAL)
        {
            return Err(TaskError::NotConfiguredForExternalSignal { secret_id });
        }
        if !secret.nonce_matches(nonce) {
            tracing::warn!(secret_id = %secret_id, "external signal with a wrong nonce");
            return Err(TaskError::InvalidNonce { secret_id });
        }

        let now = self.now();
        let lead_time = self.settings().lead_time;
        if !secret.needs_rotation(now, lead_time) {
            tracing::debug!(
                secret_id = %secret_id,
                remaining = ?secret.time_remaining(now),
                "external signal: no change needed"
            );
            return Ok(SignalOutcome::NoChangeNeeded);
        }

        let task_id = match self
            .create_task_unless_open(secret_id, ConfirmationStrategy::ExternalSignal)
            .await?
        {
            Insert::Created(task) => task.id,
            // Failed signal tasks are rerun.
            Insert::Conflict(open)
                if open.state() == TaskState::Failed
                    && open.confirmation == ConfirmationStrategy::ExternalSignal =>
            {
                tracing::info!(task_id = %open.id, "external signal: retrying failed task");
                open.id
            }
            Insert::Conflict(open) => {
                tracing::info!(
                    secret_id = %secret_id,
                    task_id = %open.id,
                    state = %open.state(),
                    "external signal: rotation already pending"
                );
                return Ok(SignalOutcome::Accepted);
            }
        };
        let executor = self.clone();
        let running = tokio::spawn(async move { executor.execute_task(task_id).await });

        let bound = self.settings().external_signal_timeout;
        match tokio::time::timeout(bound, running).await {
            Err(_) => {
                tracing::info!(
                    task_id = %task_id,
                    bound = ?bound,
                    "external signal: rotation continues in the background"
                );
                Ok(SignalOutcome::Accepted)
            }
            Ok(Err(join)) => Err(TaskError::Background {
                reason: join.to_string(),
            }),
            // Another signal claimed the same failed task first.
            Ok(Ok(Err(TaskError::InvalidState {
                state: TaskState::InProgress,
                ..
            }))) => Ok(SignalOutcome::Accepted),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Ok(Ok(task))) if task.is_completed() => Ok(SignalOutcome::Rotated),
            Ok(Ok(Ok(task))) => Err(TaskError::RotationFailed {
                task_id,
                summary: task
                    .attempts()
                    .last()
                    .and_then(|a| a.failure())
                    .map_or_else(|| "attempt did not succeed".to_string(), ToString::to_string),
            }),
        }
    }
}
