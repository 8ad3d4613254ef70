//! Timer-driven scan for secrets nearing expiry and tasks that are due.

use std::time::Duration;

use rekey_core::{ConfirmationStrategy, TaskState};
use rekey_storage::Insert;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::events::RekeyEvent;
use crate::executor::TaskExecutor;

/// Counts from one pass over the task collection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub created: usize,
    pub executed: usize,
    pub completed: usize,
    pub failed: usize,
    pub expired: usize,
    pub errors: usize,
}

/// Periodic driver for automatic rotation.
#[derive(Debug, Clone)]
pub struct Scanner {
    executor: TaskExecutor,
    interval: Duration,
}

impl Scanner {
    pub fn new(executor: TaskExecutor, interval: Duration) -> Self {
        Self { executor, interval }
    }

    /// Create a task for every secret within lead time of expiry that has none open.
    ///
    /// The strategy is the secret's preferred scan strategy; secrets that only
    /// allow external signals are left to their callers.
    pub async fn scan_secrets(&self) -> Result<usize, TaskError> {
        let store = self.executor.datastore();
        let now = self.executor.now();
        let lead_time = self.executor.settings().lead_time;
        let mut created = 0;

        for secret in store.secrets.list().await? {
            if !secret.needs_rotation(now, lead_time) {
                continue;
            }
            if !secret.can_rotate_automatically() {
                tracing::warn!(secret_id = %secret.id, "secret has a zero validity period, not scheduling");
                continue;
            }
            let Some(strategy) = ConfirmationStrategy::preferred_for_scan(secret.confirmations)
            else {
                continue;
            };
            match self
                .executor
                .create_task_unless_open(secret.id, strategy)
                .await
            {
                Ok(Insert::Conflict(_)) => {}
                Ok(Insert::Created(_)) => {
                    created += 1;
                    if secret.is_valid(now) {
                        self.executor.notify(RekeyEvent::SecretAboutToExpire {
                            secret_id: secret.id,
                            expiry: secret.expiry(),
                        });
                    } else {
                        self.executor.notify(RekeyEvent::SecretExpired {
                            secret_id: secret.id,
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!(secret_id = %secret.id, error = %err, "could not create task");
                }
            }
        }
        Ok(created)
    }

    /// Expire stale tasks and run the ones that are due.
    ///
    /// Scheduled tasks run; failed automatic tasks are retried. Tasks waiting
    /// for approval or driven by an external signal are left alone. A failing
    /// task never stops the pass.
    pub async fn scan_tasks(&self) -> Result<ScanReport, TaskError> {
        let now = self.executor.now();
        let mut report = ScanReport::default();

        for task in self.executor.datastore().tasks.list().await? {
            if matches!(
                task.state(),
                TaskState::Completed | TaskState::Expired | TaskState::InProgress
            ) {
                continue;
            }

            if task.is_expired_at(now) {
                match self.executor.expire_task(task.id).await {
                    Ok(_) => report.expired += 1,
                    Err(err) => {
                        report.errors += 1;
                        tracing::warn!(task_id = %task.id, error = %err, "could not expire task");
                    }
                }
                continue;
            }

            let due = match task.state() {
                TaskState::Scheduled => true,
                TaskState::Failed => task.confirmation.is_automatic(),
                _ => false,
            };
            if !due {
                continue;
            }

            report.executed += 1;
            match self.executor.execute_task(task.id).await {
                Ok(done) if done.is_completed() => report.completed += 1,
                Ok(_) => report.failed += 1,
                Err(err) => {
                    report.errors += 1;
                    tracing::warn!(
                        task_id = %task.id,
                        category = %err.kind(),
                        error = %err,
                        "scheduled execution failed"
                    );
                }
            }
        }
        Ok(report)
    }

    /// One full pass: secrets, then tasks.
    pub async fn scan_once(&self) -> Result<ScanReport, TaskError> {
        let created = self.scan_secrets().await?;
        let mut report = self.scan_tasks().await?;
        report.created = created;
        Ok(report)
    }

    /// Scan every interval until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.interval, "scanner started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => match self.scan_once().await {
                    Ok(report) => tracing::debug!(?report, "scan finished"),
                    Err(err) => tracing::warn!(category = %err.kind(), error = %err, "scan failed"),
                },
            }
        }
        tracing::info!("scanner stopped");
    }
}
