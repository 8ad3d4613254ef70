//! Task creation, approval and execution.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rekey_core::{
    Clock, ConfirmationStrategy, ManagedSecret, ManagedSecretId, ModelError, RekeyingTask,
    RekeyingTaskId, Resource, TaskState, WorkflowActionCollection, to_delta,
};
use rekey_storage::{Datastore, EntityStore, Insert};
use rekey_workflow::{RunRequest, WorkflowRunner};
use tokio::sync::watch;
use tracing::Instrument;

use crate::config::RekeyConfig;
use crate::credentials::CredentialBroker;
use crate::error::TaskError;
use crate::events::{EventDispatcher, RekeyEvent};

/// Timing knobs the executor needs from [`RekeyConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub lead_time: Duration,
    pub default_task_lifetime: Duration,
    pub external_signal_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&RekeyConfig::default())
    }
}

impl From<&RekeyConfig> for ExecutorSettings {
    fn from(config: &RekeyConfig) -> Self {
        Self {
            lead_time: config.lead_time,
            default_task_lifetime: config.default_task_lifetime,
            external_signal_timeout: config.external_signal_timeout,
        }
    }
}

/// Drives rekeying tasks through their lifecycle.
///
/// Cheap to clone; clones share the datastore, runner and dispatcher.
#[derive(Clone)]
pub struct TaskExecutor {
    datastore: Datastore,
    runner: Arc<dyn WorkflowRunner>,
    credentials: CredentialBroker,
    events: Arc<dyn EventDispatcher>,
    clock: Arc<dyn Clock>,
    settings: ExecutorSettings,
}

impl fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("credentials", &self.credentials)
            .field("events", &self.events)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TaskExecutor {
    pub fn new(
        datastore: Datastore,
        runner: Arc<dyn WorkflowRunner>,
        credentials: CredentialBroker,
        events: Arc<dyn EventDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            datastore,
            runner,
            credentials,
            events,
            clock,
            settings: ExecutorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn datastore(&self) -> &Datastore {
        &self.datastore
    }

    #[must_use]
    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn notify(&self, event: RekeyEvent) {
        self.events.dispatch(event);
    }

    /// Queue a rotation of `secret_id` under `strategy`.
    ///
    /// The strategy must be one the secret allows. The task starts in the
    /// state the strategy dictates: pending approval, scheduled or triggered.
    pub async fn create_task(
        &self,
        secret_id: ManagedSecretId,
        strategy: ConfirmationStrategy,
    ) -> Result<RekeyingTask, TaskError> {
        let task = self.new_task(secret_id, strategy).await?;
        let task = self.datastore.tasks.create(task).await?;
        self.announce(&task);
        Ok(task)
    }

    /// Like [`create_task`](Self::create_task), unless the secret already has
    /// an open task.
    ///
    /// The open-task check and the insert share one lease on the task
    /// collection. On a conflict nothing is created and the open task is
    /// returned.
    pub async fn create_task_unless_open(
        &self,
        secret_id: ManagedSecretId,
        strategy: ConfirmationStrategy,
    ) -> Result<Insert<RekeyingTask>, TaskError> {
        let task = self.new_task(secret_id, strategy).await?;
        let outcome = self
            .datastore
            .tasks
            .create_unless(task, move |t| {
                t.managed_secret_id == secret_id && t.is_open()
            })
            .await?;
        match &outcome {
            Insert::Created(task) => self.announce(task),
            Insert::Conflict(open) => tracing::debug!(
                secret_id = %secret_id,
                task_id = %open.id,
                state = %open.state(),
                "secret already has an open task"
            ),
        }
        Ok(outcome)
    }

    async fn new_task(
        &self,
        secret_id: ManagedSecretId,
        strategy: ConfirmationStrategy,
    ) -> Result<RekeyingTask, TaskError> {
        let secret = self.datastore.secrets.get(secret_id).await?;
        if !secret.confirmations.contains(strategy.flag()) {
            return Err(TaskError::configuration(format!(
                "secret {secret_id} does not allow {strategy}"
            )));
        }

        let now = self.clock.now();
        let mut task = RekeyingTask::new(secret.id, strategy, now, self.task_expiry(&secret, now));
        task.transition(TaskState::initial_for(strategy))?;
        Ok(task)
    }

    fn announce(&self, task: &RekeyingTask) {
        tracing::info!(
            task_id = %task.id,
            secret_id = %task.managed_secret_id,
            strategy = %task.confirmation,
            state = %task.state(),
            expiry = %task.expiry,
            "created rekeying task"
        );
        self.notify(RekeyEvent::TaskCreated {
            task_id: task.id,
            secret_id: task.managed_secret_id,
        });
    }

    /// Task deadline: the secret's own expiry if it comes first, else the default lifetime.
    fn task_expiry(&self, secret: &ManagedSecret, now: DateTime<Utc>) -> DateTime<Utc> {
        let default = now
            .checked_add_signed(to_delta(self.settings.default_task_lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        match secret.expiry() {
            Some(expiry) if expiry > now && expiry < default => expiry,
            _ => default,
        }
    }

    /// Record an administrator's approval.
    ///
    /// `AdminCachesSignOff` caches the approver's token and schedules the task.
    /// `AdminSignsOffJustInTime` triggers the task and runs it now with the
    /// approver's live session.
    pub async fn approve_task(
        &self,
        task_id: RekeyingTaskId,
        approver: &str,
    ) -> Result<RekeyingTask, TaskError> {
        let task = self.datastore.tasks.get(task_id).await?;
        if task.state() != TaskState::PendingApproval {
            return Err(TaskError::InvalidState {
                task_id,
                state: task.state(),
                reason: "only tasks pending approval can be approved",
            });
        }
        if task.is_expired_at(self.clock.now()) {
            self.expire(task_id).await?;
            return Err(TaskError::TaskExpired { task_id });
        }

        let approved_by = approver.to_owned();
        match task.confirmation {
            ConfirmationStrategy::AdminCachesSignOff => {
                let persisted = self.credentials.cache_sign_off(&task).await?;
                let cached = persisted.clone();
                let result = self
                    .transition(task_id, TaskState::Scheduled, move |t| {
                        t.persisted_credential = Some(cached);
                        t.approved_by = Some(approved_by);
                    })
                    .await;
                let task = match result {
                    Ok(task) => task,
                    Err(err) => {
                        if let Err(destroy_err) = self.credentials.destroy(&persisted).await {
                            tracing::warn!(task_id = %task_id, error = %destroy_err, "failed to drop orphaned credential");
                        }
                        return Err(err);
                    }
                };
                self.notify(RekeyEvent::TaskApproved {
                    task_id,
                    approved_by: approver.to_owned(),
                });
                Ok(task)
            }
            ConfirmationStrategy::AdminSignsOffJustInTime => {
                self.transition(task_id, TaskState::Triggered, move |t| {
                    t.approved_by = Some(approved_by);
                })
                .await?;
                self.notify(RekeyEvent::TaskApproved {
                    task_id,
                    approved_by: approver.to_owned(),
                });
                self.execute_task(task_id).await
            }
            _ => Err(TaskError::InvalidState {
                task_id,
                state: task.state(),
                reason: "the task's strategy does not take approval",
            }),
        }
    }

    /// Run one rotation attempt for `task_id`.
    ///
    /// Provider failures do not make this return `Err`: they are recorded in
    /// the attempt and the task comes back as failed. Errors are for what stops
    /// an attempt from starting (expiry, credentials, state, storage) and for
    /// setup problems the workflow reports before its first action.
    pub async fn execute_task(&self, task_id: RekeyingTaskId) -> Result<RekeyingTask, TaskError> {
        // 1. Load and check the task is runnable
        let task = self.datastore.tasks.get(task_id).await?;
        let reason = match task.state() {
            TaskState::Scheduled | TaskState::Triggered | TaskState::Failed => None,
            TaskState::Completed | TaskState::Expired => Some("the task is finished"),
            TaskState::InProgress => Some("the task is already running"),
            TaskState::Created | TaskState::PendingApproval => Some("the task is not approved"),
        };
        if let Some(reason) = reason {
            return Err(TaskError::InvalidState {
                task_id,
                state: task.state(),
                reason,
            });
        }

        // 2. Expiry
        if task.is_expired_at(self.clock.now()) {
            self.expire(task_id).await?;
            return Err(TaskError::TaskExpired { task_id });
        }

        // 3. Secret, credential, resources
        let secret = self.datastore.secrets.get(task.managed_secret_id).await?;
        let credential = match self.credentials.acquire(&task).await {
            Ok(credential) => credential,
            Err(err) => {
                tracing::warn!(task_id = %task_id, category = %err.kind(), error = %err, "credential acquisition failed");
                self.notify(RekeyEvent::TaskFailed {
                    task_id,
                    summary: err.to_string(),
                });
                return Err(err);
            }
        };
        let resources = self.datastore.resources_for(&secret).await?;

        // 4. Claim the task
        let task = self.transition(task_id, TaskState::InProgress, |_| {}).await?;

        let span = tracing::info_span!(
            "execute_task",
            task_id = %task_id,
            secret_id = %secret.id,
            strategy = %task.confirmation,
        );
        self.run_attempt(task, secret, resources, credential)
            .instrument(span)
            .await
    }

    async fn run_attempt(
        &self,
        task: RekeyingTask,
        secret: ManagedSecret,
        resources: Vec<Resource>,
        credential: rekey_core::AccessTokenCredential,
    ) -> Result<RekeyingTask, TaskError> {
        let (progress, updates) =
            watch::channel(WorkflowActionCollection::new(secret.id, self.clock.now()));
        let persister = tokio::spawn(persist_progress(
            self.datastore.tasks.clone(),
            task.id,
            updates,
        ));

        let request = RunRequest {
            secret: secret.clone(),
            resources,
            credential,
        };
        // The sender is dropped when the run returns, which ends the persister.
        let result = self.runner.run(request, Some(progress)).await;
        if let Err(err) = persister.await {
            tracing::warn!(error = %err, "progress persistence task did not finish cleanly");
        }

        match result {
            Ok(attempt) if attempt.is_success() => self.complete(task, secret, attempt).await,
            Ok(attempt) => self.fail(task, attempt).await,
            Err(err) => {
                tracing::warn!(error = %err, "workflow could not start");
                let err = TaskError::from(err);
                self.abandon(task.id, &err).await;
                Err(err)
            }
        }
    }

    async fn complete(
        &self,
        task: RekeyingTask,
        secret: ManagedSecret,
        attempt: WorkflowActionCollection,
    ) -> Result<RekeyingTask, TaskError> {
        // The provider has rotated by now; a token left behind is only logged.
        if let Some(persisted) = &task.persisted_credential {
            if let Err(err) = self.credentials.destroy(persisted).await {
                tracing::warn!(error = %err, "failed to drop cached credential after rotation");
            }
        }

        let rotated_at = attempt.completed().unwrap_or_else(|| self.clock.now());
        let marked = self
            .datastore
            .secrets
            .update_with(secret.id, move |s| {
                s.mark_rotated(rotated_at);
                Ok(())
            })
            .await;
        if let Err(err) = marked {
            let err = TaskError::from(err);
            self.abandon(task.id, &err).await;
            return Err(err);
        }
        let task = match self
            .finish(task.id, attempt, TaskState::Completed, |t| {
                t.persisted_credential = None;
            })
            .await
        {
            Ok(task) => task,
            Err(err) => {
                self.abandon(task.id, &err).await;
                return Err(err);
            }
        };

        tracing::info!(rotated_at = %rotated_at, "rotation completed");
        self.notify(RekeyEvent::TaskCompleted {
            task_id: task.id,
            secret_id: secret.id,
        });
        self.notify(RekeyEvent::SecretRotated {
            secret_id: secret.id,
            at: rotated_at,
        });
        Ok(task)
    }

    async fn fail(
        &self,
        task: RekeyingTask,
        attempt: WorkflowActionCollection,
    ) -> Result<RekeyingTask, TaskError> {
        let summary = attempt
            .failure()
            .map_or_else(|| "attempt did not succeed".to_string(), ToString::to_string);
        let task = match self
            .finish(task.id, attempt, TaskState::Failed, |_| {})
            .await
        {
            Ok(task) => task,
            Err(err) => {
                self.abandon(task.id, &err).await;
                return Err(err);
            }
        };

        tracing::warn!(summary = %summary, "rotation failed");
        self.notify(RekeyEvent::TaskFailed {
            task_id: task.id,
            summary,
        });
        Ok(task)
    }

    /// Move a claimed task out of `InProgress` after `err` stopped its attempt
    /// from being recorded. Never fails; a task that cannot be moved is logged.
    async fn abandon(&self, task_id: RekeyingTaskId, err: &TaskError) {
        let summary = err.to_string();
        match self.transition(task_id, TaskState::Failed, |_| {}).await {
            Ok(_) => tracing::warn!(
                error = %summary,
                "attempt could not be recorded, task marked failed"
            ),
            Err(stuck) => tracing::error!(
                error = %summary,
                transition_error = %stuck,
                "attempt could not be recorded and the task could not be marked failed"
            ),
        }
        self.notify(RekeyEvent::TaskFailed { task_id, summary });
    }

    /// Move an unfinished task to `Expired`, dropping any cached credential.
    pub async fn expire_task(&self, task_id: RekeyingTaskId) -> Result<RekeyingTask, TaskError> {
        self.expire(task_id).await
    }

    async fn expire(&self, task_id: RekeyingTaskId) -> Result<RekeyingTask, TaskError> {
        let cached = self.datastore.tasks.get(task_id).await?.persisted_credential;
        let task = self
            .transition(task_id, TaskState::Expired, |t| {
                t.persisted_credential = None;
            })
            .await?;
        if let Some(persisted) = cached {
            if let Err(err) = self.credentials.destroy(&persisted).await {
                tracing::warn!(task_id = %task_id, error = %err, "failed to drop cached credential of expired task");
            }
        }
        tracing::info!(task_id = %task_id, expiry = %task.expiry, "task expired");
        self.notify(RekeyEvent::TaskExpired { task_id });
        Ok(task)
    }

    /// Apply a validated transition under the collection lease.
    ///
    /// `update` runs only if the transition is allowed.
    async fn transition<F>(
        &self,
        task_id: RekeyingTaskId,
        to: TaskState,
        update: F,
    ) -> Result<RekeyingTask, TaskError>
    where
        F: FnOnce(&mut RekeyingTask) + Send,
    {
        let (task, outcome) = self
            .datastore
            .tasks
            .update_with(task_id, move |t| {
                let outcome = t.transition(to);
                if outcome.is_ok() {
                    update(t);
                }
                Ok(outcome)
            })
            .await?;
        outcome?;
        Ok(task)
    }

    /// Record the final attempt and the resulting state in one write.
    async fn finish<F>(
        &self,
        task_id: RekeyingTaskId,
        attempt: WorkflowActionCollection,
        to: TaskState,
        update: F,
    ) -> Result<RekeyingTask, TaskError>
    where
        F: FnOnce(&mut RekeyingTask) + Send,
    {
        let (task, outcome) = self
            .datastore
            .tasks
            .update_with(task_id, move |t| {
                let outcome = record_final(t, attempt).and_then(|()| t.transition(to));
                if outcome.is_ok() {
                    update(t);
                }
                Ok(outcome)
            })
            .await?;
        outcome?;
        Ok(task)
    }
}

/// Record a sealed attempt unless the progress writer already stored it.
fn record_final(task: &mut RekeyingTask, attempt: WorkflowActionCollection) -> Result<(), ModelError> {
    let already_sealed = task
        .attempts()
        .last()
        .is_some_and(|last| last.id() == attempt.id() && last.is_sealed());
    if already_sealed {
        return Ok(());
    }
    task.record_attempt(attempt)
}

/// Re-save the in-flight attempt whenever the workflow publishes a change.
///
/// Ends when the sending side is dropped.
async fn persist_progress(
    tasks: EntityStore<RekeyingTask>,
    task_id: RekeyingTaskId,
    mut updates: watch::Receiver<WorkflowActionCollection>,
) {
    while updates.changed().await.is_ok() {
        let attempt = updates.borrow_and_update().clone();
        let actions = attempt.actions().len();
        match tasks
            .update_with(task_id, move |t| Ok(t.record_attempt(attempt)))
            .await
        {
            Ok((_, Ok(()))) => {
                tracing::trace!(task_id = %task_id, actions, "persisted attempt progress");
            }
            Ok((_, Err(err))) => {
                tracing::debug!(task_id = %task_id, error = %err, "skipped progress update");
            }
            Err(err) => {
                tracing::warn!(task_id = %task_id, error = %err, "failed to persist attempt progress");
            }
        }
    }
}
