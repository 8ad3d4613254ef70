//! Task execution errors.

use std::fmt;

use rekey_core::{
    CredentialSourceError, ManagedSecretId, ModelError, RekeyingTaskId, TaskState,
};
use rekey_storage::StoreError;
use rekey_workflow::WorkflowError;
use thiserror::Error;

/// Broad failure classes, used for logging and event summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    Credential,
    ProviderExecution,
    ConcurrencyTimeout,
    ObjectNotFound,
    DuplicateHint,
    /// Request rejected because of the task or secret state.
    State,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Configuration => "configuration",
            Self::Credential => "credential",
            Self::ProviderExecution => "provider_execution",
            Self::ConcurrencyTimeout => "concurrency_timeout",
            Self::ObjectNotFound => "object_not_found",
            Self::DuplicateHint => "duplicate_hint",
            Self::State => "state",
            Self::Internal => "internal",
        })
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("task {task_id} has no cached credential")]
    CredentialNotFound { task_id: RekeyingTaskId },

    #[error("credential for task {task_id} has an empty token")]
    InvalidCredential { task_id: RekeyingTaskId },

    #[error("credential for task {task_id} has expired")]
    CredentialExpired { task_id: RekeyingTaskId },

    #[error("could not obtain credential: {0}")]
    CredentialSource(#[from] CredentialSourceError),

    #[error("{kind} {id} not found")]
    ObjectNotFound { kind: &'static str, id: String },

    #[error("could not acquire lease on '{collection}'")]
    ConcurrencyTimeout { collection: String },

    #[error("task {task_id} expired before it could run")]
    TaskExpired { task_id: RekeyingTaskId },

    #[error("secret {secret_id} is not configured for external signals")]
    NotConfiguredForExternalSignal { secret_id: ManagedSecretId },

    #[error("nonce does not match secret {secret_id}")]
    InvalidNonce { secret_id: ManagedSecretId },

    #[error("task {task_id} is {state}; {reason}")]
    InvalidState {
        task_id: RekeyingTaskId,
        state: TaskState,
        reason: &'static str,
    },

    /// The workflow ran and recorded a failure.
    #[error("rotation of task {task_id} failed: {summary}")]
    RotationFailed {
        task_id: RekeyingTaskId,
        summary: String,
    },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("storage error: {0}")]
    Store(StoreError),

    #[error("background execution failed: {reason}")]
    Background { reason: String },
}

impl From<StoreError> for TaskError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ObjectNotFound { kind, id } => Self::ObjectNotFound { kind, id },
            StoreError::ConcurrencyTimeout { collection, .. } => {
                Self::ConcurrencyTimeout { collection }
            }
            other => Self::Store(other),
        }
    }
}

impl TaskError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Classify the error.
    #[must_use]
    pub fn kind(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } | Self::NotConfiguredForExternalSignal { .. } => {
                ErrorCategory::Configuration
            }
            Self::Workflow(e) if e.is_configuration() => ErrorCategory::Configuration,
            Self::Workflow(_) => ErrorCategory::Internal,
            Self::CredentialNotFound { .. }
            | Self::InvalidCredential { .. }
            | Self::CredentialExpired { .. }
            | Self::CredentialSource(_)
            | Self::InvalidNonce { .. } => ErrorCategory::Credential,
            Self::ObjectNotFound { .. } => ErrorCategory::ObjectNotFound,
            Self::ConcurrencyTimeout { .. } => ErrorCategory::ConcurrencyTimeout,
            Self::TaskExpired { .. } | Self::InvalidState { .. } | Self::Model(_) => {
                ErrorCategory::State
            }
            Self::RotationFailed { .. } => ErrorCategory::ProviderExecution,
            Self::Store(_) | Self::Background { .. } => ErrorCategory::Internal,
        }
    }

    /// `true` for errors caused by the caller's input rather than the system.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ObjectNotFound { .. }
                | Self::NotConfiguredForExternalSignal { .. }
                | Self::InvalidNonce { .. }
        )
    }
}
