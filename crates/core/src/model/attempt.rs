//! Attempt log: the ordered record of one run of the rotation protocol.
//!
//! The engine plans every action up front, then walks them in order. Each
//! action carries its own timestamps, a structured log and an outcome. Once
//! [`WorkflowActionCollection::seal`] is called the collection is frozen.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ModelError;
use crate::id::{AttemptId, ManagedSecretId, ResourceId};

/// Protocol phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    /// Pre-flight checks that touch no provider.
    Prepare,
    /// Read-only provider checks.
    SanityTest,
    /// Obtain already-valid alternate secrets.
    GenerateTemporary,
    /// Push and swap the alternates into consumers.
    DistributeTemporary,
    /// Mutate the primary credential.
    Rekey,
    /// Push and swap the rekeyed secrets into consumers.
    Commit,
    /// Retire unused material.
    Cleanup,
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prepare => "prepare",
            Self::SanityTest => "sanity_test",
            Self::GenerateTemporary => "generate_temporary",
            Self::DistributeTemporary => "distribute_temporary",
            Self::Rekey => "rekey",
            Self::Commit => "commit",
            Self::Cleanup => "cleanup",
        })
    }
}

/// A single provider call (or engine check) within a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderOperation {
    ValidateDeclaredHints,
    RunSanityTests,
    GenerateTemporarySecret,
    DistributeTemporarySecrets,
    CommitTemporarySecrets,
    Rekey,
    DistributeLongTermSecrets,
    UnifiedCommit,
    Cleanup,
}

impl ProviderOperation {
    /// Phase this operation belongs to.
    #[must_use]
    pub fn phase(self) -> WorkflowPhase {
        match self {
            Self::ValidateDeclaredHints => WorkflowPhase::Prepare,
            Self::RunSanityTests => WorkflowPhase::SanityTest,
            Self::GenerateTemporarySecret => WorkflowPhase::GenerateTemporary,
            Self::DistributeTemporarySecrets | Self::CommitTemporarySecrets => {
                WorkflowPhase::DistributeTemporary
            }
            Self::Rekey => WorkflowPhase::Rekey,
            Self::DistributeLongTermSecrets | Self::UnifiedCommit => WorkflowPhase::Commit,
            Self::Cleanup => WorkflowPhase::Cleanup,
        }
    }

    /// `true` for calls that change provider-side state.
    #[must_use]
    pub fn is_mutating(self) -> bool {
        !matches!(
            self,
            Self::ValidateDeclaredHints | Self::RunSanityTests | Self::GenerateTemporarySecret
        )
    }
}

impl fmt::Display for ProviderOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ValidateDeclaredHints => "validate_declared_hints",
            Self::RunSanityTests => "run_sanity_tests",
            Self::GenerateTemporarySecret => "generate_temporary_secret",
            Self::DistributeTemporarySecrets => "distribute_temporary_secrets",
            Self::CommitTemporarySecrets => "commit_temporary_secrets",
            Self::Rekey => "rekey",
            Self::DistributeLongTermSecrets => "distribute_long_term_secrets",
            Self::UnifiedCommit => "unified_commit",
            Self::Cleanup => "cleanup",
        })
    }
}

/// Classification of a failed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionErrorKind {
    /// The provider call returned an error.
    ProviderExecution,
    /// A batch carried missing or colliding user hints.
    DuplicateHint,
    /// The call or the attempt ran out of time.
    Timeout,
    /// Provider or secret setup is unusable.
    Configuration,
}

impl fmt::Display for ActionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ProviderExecution => "provider execution failed",
            Self::DuplicateHint => "duplicate user hint",
            Self::Timeout => "timed out",
            Self::Configuration => "configuration error",
        })
    }
}

/// Error captured into an action. Never carries secret material.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ActionError {
    pub kind: ActionErrorKind,
    pub message: String,
}

impl ActionError {
    pub fn new(kind: ActionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn provider_execution(message: impl Into<String>) -> Self {
        Self::new(ActionErrorKind::ProviderExecution, message)
    }

    pub fn duplicate_hint(message: impl Into<String>) -> Self {
        Self::new(ActionErrorKind::DuplicateHint, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ActionErrorKind::Timeout, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ActionErrorKind::Configuration, message)
    }
}

/// How an action ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Planned, not reached yet.
    Pending,
    Succeeded,
    Failed(ActionError),
    /// Skipped because an earlier action failed.
    NotRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One line of an action's structured log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// One step of an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowAction {
    /// Phase tag.
    pub phase: WorkflowPhase,
    /// Call made.
    pub operation: ProviderOperation,
    /// Resource the call targets; `None` for engine-level checks.
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
    /// Provider type of the target.
    #[serde(default)]
    pub provider_type: String,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub log: Vec<ActionLogEntry>,
    pub outcome: ActionOutcome,
}

impl WorkflowAction {
    /// Pending action for `operation`.
    pub fn new(
        operation: ProviderOperation,
        resource_id: Option<ResourceId>,
        provider_type: impl Into<String>,
    ) -> Self {
        Self {
            phase: operation.phase(),
            operation,
            resource_id,
            provider_type: provider_type.into(),
            started: None,
            completed: None,
            log: Vec::new(),
            outcome: ActionOutcome::Pending,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == ActionOutcome::Succeeded
    }
}

/// Overall status of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Running,
    Succeeded,
    Failed,
}

/// One execution of the rotation protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowActionCollection {
    id: AttemptId,
    managed_secret_id: ManagedSecretId,
    started: DateTime<Utc>,
    #[serde(default)]
    completed: Option<DateTime<Utc>>,
    #[serde(default)]
    actions: Vec<WorkflowAction>,
    status: AttemptStatus,
}

impl WorkflowActionCollection {
    pub fn new(managed_secret_id: ManagedSecretId, started: DateTime<Utc>) -> Self {
        Self {
            id: AttemptId::v4(),
            managed_secret_id,
            started,
            completed: None,
            actions: Vec::new(),
            status: AttemptStatus::Running,
        }
    }

    #[must_use]
    pub fn id(&self) -> AttemptId {
        self.id
    }

    #[must_use]
    pub fn managed_secret_id(&self) -> ManagedSecretId {
        self.managed_secret_id
    }

    #[must_use]
    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    #[must_use]
    pub fn completed(&self) -> Option<DateTime<Utc>> {
        self.completed
    }

    #[must_use]
    pub fn actions(&self) -> &[WorkflowAction] {
        &self.actions
    }

    #[must_use]
    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.completed.is_some()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == AttemptStatus::Succeeded
    }

    /// First captured failure.
    #[must_use]
    pub fn failure(&self) -> Option<&ActionError> {
        self.actions.iter().find_map(|a| match &a.outcome {
            ActionOutcome::Failed(err) => Some(err),
            _ => None,
        })
    }

    /// Actions for one resource, in order.
    pub fn actions_for(&self, resource: ResourceId) -> impl Iterator<Item = &WorkflowAction> {
        self.actions
            .iter()
            .filter(move |a| a.resource_id == Some(resource))
    }

    /// Append a pending action, returning its index.
    pub fn plan(&mut self, action: WorkflowAction) -> Result<usize, ModelError> {
        self.ensure_open()?;
        self.actions.push(action);
        Ok(self.actions.len() - 1)
    }

    pub fn start_action(&mut self, index: usize, at: DateTime<Utc>) -> Result<(), ModelError> {
        self.action_mut(index)?.started = Some(at);
        Ok(())
    }

    pub fn log_action(
        &mut self,
        index: usize,
        at: DateTime<Utc>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Result<(), ModelError> {
        self.action_mut(index)?.log.push(ActionLogEntry {
            at,
            level,
            message: message.into(),
        });
        Ok(())
    }

    /// Record how action `index` ended.
    pub fn finish_action(
        &mut self,
        index: usize,
        at: DateTime<Utc>,
        result: Result<(), ActionError>,
    ) -> Result<(), ModelError> {
        let action = self.action_mut(index)?;
        action.completed = Some(at);
        action.outcome = match result {
            Ok(()) => ActionOutcome::Succeeded,
            Err(err) => ActionOutcome::Failed(err),
        };
        Ok(())
    }

    /// Freeze the log. Success requires every action to have succeeded;
    /// otherwise actions still pending are marked not run.
    ///
    /// Sealing twice keeps the first result.
    pub fn seal(&mut self, at: DateTime<Utc>) {
        if self.is_sealed() {
            return;
        }
        let success = self.actions.iter().all(WorkflowAction::is_success);
        if !success {
            for action in &mut self.actions {
                if action.outcome == ActionOutcome::Pending {
                    action.outcome = ActionOutcome::NotRun;
                }
            }
        }
        self.status = if success {
            AttemptStatus::Succeeded
        } else {
            AttemptStatus::Failed
        };
        self.completed = Some(at);
    }

    fn ensure_open(&self) -> Result<(), ModelError> {
        if self.is_sealed() {
            Err(ModelError::AttemptSealed(self.id))
        } else {
            Ok(())
        }
    }

    fn action_mut(&mut self, index: usize) -> Result<&mut WorkflowAction, ModelError> {
        self.ensure_open()?;
        let len = self.actions.len();
        self.actions
            .get_mut(index)
            .ok_or(ModelError::ActionOutOfRange { index, len })
    }
}
