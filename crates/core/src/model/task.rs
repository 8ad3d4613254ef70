//! Rekeying task lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::id::{ManagedSecretId, RekeyingTaskId, SecureEntryId};
use crate::model::attempt::WorkflowActionCollection;
use crate::model::secret::ConfirmationStrategies;

/// The single strategy a task was created under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStrategy {
    /// Live on-behalf-of exchange at execution time.
    AdminSignsOffJustInTime,
    /// On-behalf-of token cached at approval time.
    AdminCachesSignOff,
    /// Application credential, triggered by the expiry scan.
    AutomaticRekeyingAsNeeded,
    /// Application credential, triggered on schedule.
    AutomaticRekeyingScheduled,
    /// Application credential, triggered by a caller holding the nonce.
    ExternalSignal,
}

impl ConfirmationStrategy {
    /// All strategies, in preference order for automatic task creation.
    pub const ALL: [Self; 5] = [
        Self::AutomaticRekeyingAsNeeded,
        Self::AutomaticRekeyingScheduled,
        Self::AdminCachesSignOff,
        Self::AdminSignsOffJustInTime,
        Self::ExternalSignal,
    ];

    /// The flag this strategy occupies in [`ConfirmationStrategies`].
    #[must_use]
    pub fn flag(self) -> ConfirmationStrategies {
        match self {
            Self::AdminSignsOffJustInTime => ConfirmationStrategies::ADMIN_SIGNS_OFF_JUST_IN_TIME,
            Self::AdminCachesSignOff => ConfirmationStrategies::ADMIN_CACHES_SIGN_OFF,
            Self::AutomaticRekeyingAsNeeded => ConfirmationStrategies::AUTOMATIC_REKEYING_AS_NEEDED,
            Self::AutomaticRekeyingScheduled => {
                ConfirmationStrategies::AUTOMATIC_REKEYING_SCHEDULED
            }
            Self::ExternalSignal => ConfirmationStrategies::EXTERNAL_SIGNAL,
        }
    }

    /// No human approval needed.
    #[must_use]
    pub fn is_automatic(self) -> bool {
        ConfirmationStrategies::AUTOMATIC.contains(self.flag())
    }

    /// An administrator must approve before execution.
    #[must_use]
    pub fn requires_approval(self) -> bool {
        ConfirmationStrategies::ADMIN.contains(self.flag())
    }

    /// First strategy (in [`Self::ALL`] order) enabled in `flags` that runs without a caller.
    ///
    /// External signals are excluded; they create their own tasks.
    #[must_use]
    pub fn preferred_for_scan(flags: ConfirmationStrategies) -> Option<Self> {
        Self::ALL
            .into_iter()
            .filter(|s| *s != Self::ExternalSignal)
            .find(|s| flags.contains(s.flag()))
    }
}

impl fmt::Display for ConfirmationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AdminSignsOffJustInTime => "admin_signs_off_just_in_time",
            Self::AdminCachesSignOff => "admin_caches_sign_off",
            Self::AutomaticRekeyingAsNeeded => "automatic_rekeying_as_needed",
            Self::AutomaticRekeyingScheduled => "automatic_rekeying_scheduled",
            Self::ExternalSignal => "external_signal",
        })
    }
}

/// Lifecycle state of a [`RekeyingTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Just created.
    Created,
    /// Waiting on an administrator.
    PendingApproval,
    /// Approved or automatic, waiting for its time.
    Scheduled,
    /// Ready to run now.
    Triggered,
    /// A workflow attempt is running.
    InProgress,
    /// Last attempt succeeded.
    Completed,
    /// Last attempt failed; may be retried before expiry.
    Failed,
    /// Expiry passed before a successful run.
    Expired,
}

impl TaskState {
    /// State a freshly created task moves to under `strategy`.
    #[must_use]
    pub fn initial_for(strategy: ConfirmationStrategy) -> Self {
        match strategy {
            ConfirmationStrategy::AdminSignsOffJustInTime
            | ConfirmationStrategy::AdminCachesSignOff => Self::PendingApproval,
            ConfirmationStrategy::AutomaticRekeyingAsNeeded
            | ConfirmationStrategy::AutomaticRekeyingScheduled => Self::Scheduled,
            ConfirmationStrategy::ExternalSignal => Self::Triggered,
        }
    }

    /// No further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Expired)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::PendingApproval => "pending_approval",
            Self::Scheduled => "scheduled",
            Self::Triggered => "triggered",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns `true` if a task may move from `from` to `to`.
#[must_use]
pub fn can_transition_task(from: TaskState, to: TaskState) -> bool {
    use TaskState::{
        Completed, Created, Expired, Failed, InProgress, PendingApproval, Scheduled, Triggered,
    };
    matches!(
        (from, to),
        (Created, PendingApproval)
            | (Created, Scheduled)
            | (Created, Triggered)
            | (Created, Expired)
            | (PendingApproval, Scheduled)
            | (PendingApproval, Triggered)
            | (PendingApproval, Expired)
            | (Scheduled, InProgress)
            | (Scheduled, Expired)
            | (Triggered, InProgress)
            | (Triggered, Expired)
            | (InProgress, Completed)
            | (InProgress, Failed)
            | (Failed, InProgress)
            | (Failed, Expired)
    )
}

/// An on-behalf-of token parked in secure storage for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCredential {
    /// Secure storage entry.
    pub id: SecureEntryId,
    /// Principal that approved the task.
    pub owner: String,
}

/// One scheduled or triggered rotation of a managed secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RekeyingTask {
    /// Identifier.
    pub id: RekeyingTaskId,
    /// Secret to rotate.
    pub managed_secret_id: ManagedSecretId,
    /// When the task was created.
    pub queued: DateTime<Utc>,
    /// Deadline; past it the task can only expire.
    pub expiry: DateTime<Utc>,
    /// Strategy snapshot taken at creation.
    pub confirmation: ConfirmationStrategy,
    /// Cached credential, for [`ConfirmationStrategy::AdminCachesSignOff`].
    #[serde(default)]
    pub persisted_credential: Option<PersistedCredential>,
    /// Who approved the task, if anyone.
    #[serde(default)]
    pub approved_by: Option<String>,
    state: TaskState,
    #[serde(default)]
    attempts: Vec<WorkflowActionCollection>,
}

impl RekeyingTask {
    /// New task in [`TaskState::Created`].
    pub fn new(
        managed_secret_id: ManagedSecretId,
        confirmation: ConfirmationStrategy,
        queued: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RekeyingTaskId::v4(),
            managed_secret_id,
            queued,
            expiry,
            confirmation,
            persisted_credential: None,
            approved_by: None,
            state: TaskState::Created,
            attempts: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Move to `to`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, to: TaskState) -> Result<(), ModelError> {
        if can_transition_task(self.state, to) {
            self.state = to;
            Ok(())
        } else {
            Err(ModelError::InvalidTransition {
                from: self.state,
                to,
            })
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state == TaskState::Completed
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state == TaskState::Failed
    }

    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.state == TaskState::InProgress
    }

    /// Not yet finished one way or the other.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.state.is_terminal()
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    /// Attempts in execution order.
    #[must_use]
    pub fn attempts(&self) -> &[WorkflowActionCollection] {
        &self.attempts
    }

    /// Record an attempt.
    ///
    /// An unsealed attempt with the same id as the latest one replaces it, so an
    /// in-flight attempt can be re-saved as it grows. Sealed attempts are never
    /// rewritten.
    pub fn record_attempt(&mut self, attempt: WorkflowActionCollection) -> Result<(), ModelError> {
        if let Some(pos) = self.attempts.iter().position(|a| a.id() == attempt.id()) {
            let existing = &self.attempts[pos];
            if existing.is_sealed() || pos + 1 != self.attempts.len() {
                return Err(ModelError::AttemptSealed(attempt.id()));
            }
            self.attempts[pos] = attempt;
        } else {
            self.attempts.push(attempt);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attempt::{ActionOutcome, ProviderOperation, WorkflowAction};
    use chrono::TimeDelta;
    use rstest::rstest;

    fn task(strategy: ConfirmationStrategy) -> RekeyingTask {
        let now = Utc::now();
        RekeyingTask::new(ManagedSecretId::v4(), strategy, now, now + TimeDelta::days(1))
    }

    #[rstest]
    #[case(TaskState::Created, TaskState::Scheduled, true)]
    #[case(TaskState::PendingApproval, TaskState::Triggered, true)]
    #[case(TaskState::Scheduled, TaskState::InProgress, true)]
    #[case(TaskState::InProgress, TaskState::Completed, true)]
    #[case(TaskState::Failed, TaskState::InProgress, true)]
    #[case(TaskState::Created, TaskState::InProgress, false)]
    #[case(TaskState::PendingApproval, TaskState::InProgress, false)]
    #[case(TaskState::Completed, TaskState::InProgress, false)]
    #[case(TaskState::InProgress, TaskState::Expired, false)]
    #[case(TaskState::Expired, TaskState::Scheduled, false)]
    #[case(TaskState::Completed, TaskState::Failed, false)]
    fn transitions(#[case] from: TaskState, #[case] to: TaskState, #[case] ok: bool) {
        assert_eq!(can_transition_task(from, to), ok);
    }

    #[test]
    fn initial_state_per_strategy() {
        assert_eq!(
            TaskState::initial_for(ConfirmationStrategy::AdminCachesSignOff),
            TaskState::PendingApproval
        );
        assert_eq!(
            TaskState::initial_for(ConfirmationStrategy::AutomaticRekeyingScheduled),
            TaskState::Scheduled
        );
        assert_eq!(
            TaskState::initial_for(ConfirmationStrategy::ExternalSignal),
            TaskState::Triggered
        );
    }

    #[test]
    fn flags_are_mutually_exclusive() {
        let mut t = task(ConfirmationStrategy::ExternalSignal);
        t.transition(TaskState::Triggered).unwrap();
        t.transition(TaskState::InProgress).unwrap();
        assert!(t.is_in_progress() && !t.is_completed() && !t.is_failed());
        t.transition(TaskState::Failed).unwrap();
        assert!(t.is_failed() && !t.is_in_progress());
        t.transition(TaskState::InProgress).unwrap();
        t.transition(TaskState::Completed).unwrap();
        assert!(t.is_completed() && !t.is_failed());
        assert!(!t.is_open());
    }

    #[test]
    fn rejected_transition_leaves_state() {
        let mut t = task(ConfirmationStrategy::AdminCachesSignOff);
        let err = t.transition(TaskState::Completed).unwrap_err();
        assert_eq!(
            err,
            ModelError::InvalidTransition {
                from: TaskState::Created,
                to: TaskState::Completed
            }
        );
        assert_eq!(t.state(), TaskState::Created);
    }

    #[test]
    fn strategy_classification() {
        assert!(ConfirmationStrategy::AutomaticRekeyingAsNeeded.is_automatic());
        assert!(!ConfirmationStrategy::ExternalSignal.is_automatic());
        assert!(ConfirmationStrategy::AdminSignsOffJustInTime.requires_approval());
        assert_eq!(
            ConfirmationStrategy::preferred_for_scan(
                ConfirmationStrategies::EXTERNAL_SIGNAL | ConfirmationStrategies::ADMIN_CACHES_SIGN_OFF
            ),
            Some(ConfirmationStrategy::AdminCachesSignOff)
        );
        assert_eq!(
            ConfirmationStrategy::preferred_for_scan(ConfirmationStrategies::EXTERNAL_SIGNAL),
            None
        );
    }

    #[test]
    fn attempts_are_append_only() {
        let mut t = task(ConfirmationStrategy::ExternalSignal);
        let now = Utc::now();
        let mut attempt = WorkflowActionCollection::new(t.managed_secret_id, now);
        attempt
            .plan(WorkflowAction::new(ProviderOperation::Rekey, None, "kv"))
            .unwrap();
        t.record_attempt(attempt.clone()).unwrap();

        attempt.start_action(0, now).unwrap();
        attempt.finish_action(0, now, Ok(())).unwrap();
        t.record_attempt(attempt.clone()).unwrap();
        assert_eq!(t.attempts().len(), 1);
        assert_eq!(t.attempts()[0].actions()[0].outcome, ActionOutcome::Succeeded);

        attempt.seal(now);
        t.record_attempt(attempt.clone()).unwrap();
        assert!(t.record_attempt(attempt.clone()).is_err());

        let second = WorkflowActionCollection::new(t.managed_secret_id, now);
        t.record_attempt(second).unwrap();
        assert_eq!(t.attempts().len(), 2);
        assert!(t.record_attempt(attempt).is_err());
    }

    #[test]
    fn serde_round_trip() {
        let t = task(ConfirmationStrategy::AdminCachesSignOff);
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains(r#""state":"created""#));
        let back: RekeyingTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
