//! Rotation workflow engine.

use std::future::Future;
use std::sync::Arc;

use rekey_core::{
    ActionError, Clock, LogLevel, ManagedSecret, ModelError, ProviderOperation, RegeneratedSecret,
    ValidityRisk, WorkflowAction, WorkflowActionCollection,
};
use rekey_provider::{ProviderError, ProviderInstance};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::Instrument;

use crate::error::WorkflowError;
use crate::hints::{validate_batch, validate_hints};
use crate::options::WorkflowOptions;

/// One planned action and the provider it targets.
#[derive(Debug, Clone, Copy)]
struct Step {
    action: usize,
    provider: Option<usize>,
    operation: ProviderOperation,
}

/// Secrets gathered so far in one run.
#[derive(Default)]
struct Batches {
    temporary: Vec<RegeneratedSecret>,
    long_term: Vec<RegeneratedSecret>,
}

/// Runs the phased rotation protocol over a set of provider instances.
///
/// Actions are planned up front and executed strictly one after another. The
/// first failure stops the run: later actions are marked not-run and the log
/// is sealed. Nothing already applied is undone.
#[derive(Debug, Clone)]
pub struct RotationWorkflow {
    options: WorkflowOptions,
    clock: Arc<dyn Clock>,
}

impl RotationWorkflow {
    pub fn new(options: WorkflowOptions, clock: Arc<dyn Clock>) -> Self {
        Self { options, clock }
    }

    #[must_use]
    pub fn options(&self) -> &WorkflowOptions {
        &self.options
    }

    /// Rotate `secret` using `providers`.
    ///
    /// Provider failures end up in the returned log, not in the `Err` arm. When
    /// `progress` is given, the log is published to it after every change.
    pub async fn run(
        &self,
        secret: &ManagedSecret,
        providers: &[ProviderInstance],
        progress: Option<&watch::Sender<WorkflowActionCollection>>,
    ) -> Result<WorkflowActionCollection, WorkflowError> {
        if providers.is_empty() {
            return Err(WorkflowError::NoProviders {
                secret_id: secret.id,
            });
        }
        if !providers.iter().any(|p| p.rekey().is_some()) {
            return Err(WorkflowError::NoRekeyableProvider {
                secret_id: secret.id,
            });
        }
        if secret.validity_risk() != ValidityRisk::None {
            tracing::warn!(
                secret_id = %secret.id,
                risk = ?secret.validity_risk(),
                "validity period makes the expiry window meaningless"
            );
        }

        let span = tracing::info_span!("rotation", secret_id = %secret.id);
        self.execute_all(secret, providers, progress)
            .instrument(span)
            .await
    }

    async fn execute_all(
        &self,
        secret: &ManagedSecret,
        providers: &[ProviderInstance],
        progress: Option<&watch::Sender<WorkflowActionCollection>>,
    ) -> Result<WorkflowActionCollection, WorkflowError> {
        let budget_start = Instant::now();

        // 1. Plan every action
        let mut attempt = WorkflowActionCollection::new(secret.id, self.clock.now());
        let steps = self.plan(&mut attempt, providers)?;
        publish(progress, &attempt);
        tracing::info!(attempt_id = %attempt.id(), actions = steps.len(), "rotation started");

        // 2. Execute in order, stopping at the first failure
        let mut batches = Batches::default();
        for step in &steps {
            if budget_start.elapsed() >= self.options.attempt_timeout {
                let err = ActionError::timeout(format!(
                    "attempt budget of {:?} exhausted before {}",
                    self.options.attempt_timeout, step.operation
                ));
                tracing::warn!(operation = %step.operation, "attempt budget exhausted");
                attempt.finish_action(step.action, self.clock.now(), Err(err))?;
                break;
            }

            let provider = step.provider.map(|i| &providers[i]);
            let span = tracing::info_span!(
                "action",
                phase = %step.operation.phase(),
                operation = %step.operation,
                resource_id = ?provider.map(ProviderInstance::resource_id),
            );

            attempt.start_action(step.action, self.clock.now())?;
            attempt.log_action(
                step.action,
                self.clock.now(),
                LogLevel::Info,
                format!("starting {}", step.operation),
            )?;
            publish(progress, &attempt);

            let result = self
                .execute(*step, provider, providers, secret, &mut batches)
                .instrument(span)
                .await;

            let failed = result.is_err();
            match &result {
                Ok(()) => {
                    tracing::debug!(operation = %step.operation, "action succeeded");
                    attempt.log_action(
                        step.action,
                        self.clock.now(),
                        LogLevel::Info,
                        format!("{} succeeded", step.operation),
                    )?;
                }
                Err(err) => {
                    tracing::warn!(operation = %step.operation, error = %err, "action failed");
                    attempt.log_action(step.action, self.clock.now(), LogLevel::Error, err.to_string())?;
                }
            }
            attempt.finish_action(step.action, self.clock.now(), result)?;
            publish(progress, &attempt);

            if failed {
                break;
            }
        }

        // 3. Seal
        attempt.seal(self.clock.now());
        publish(progress, &attempt);

        match attempt.failure() {
            None => tracing::info!(attempt_id = %attempt.id(), "rotation succeeded"),
            Some(err) => tracing::warn!(attempt_id = %attempt.id(), error = %err, "rotation failed"),
        }
        Ok(attempt)
    }

    fn plan(
        &self,
        attempt: &mut WorkflowActionCollection,
        providers: &[ProviderInstance],
    ) -> Result<Vec<Step>, ModelError> {
        let mut steps = Vec::new();
        let mut push = |attempt: &mut WorkflowActionCollection,
                        operation: ProviderOperation,
                        provider: Option<usize>|
         -> Result<(), ModelError> {
            let target = provider.map(|i| &providers[i]);
            let action = attempt.plan(WorkflowAction::new(
                operation,
                target.map(ProviderInstance::resource_id),
                target.map_or("", ProviderInstance::provider_type),
            ))?;
            steps.push(Step {
                action,
                provider,
                operation,
            });
            Ok(())
        };
        let indexed = |has: fn(&ProviderInstance) -> bool| {
            providers
                .iter()
                .enumerate()
                .filter(move |(_, p)| has(p))
                .map(|(i, _)| i)
                .collect::<Vec<_>>()
        };

        push(attempt, ProviderOperation::ValidateDeclaredHints, None)?;

        if self.options.run_sanity_tests {
            for i in indexed(|p| p.sanity_tester().is_some()) {
                push(attempt, ProviderOperation::RunSanityTests, Some(i))?;
            }
        }

        let generators = indexed(|p| p.temporary_generator().is_some());
        for &i in &generators {
            push(attempt, ProviderOperation::GenerateTemporarySecret, Some(i))?;
        }
        if !generators.is_empty() {
            for i in indexed(|p| p.temporary_distributor().is_some()) {
                push(attempt, ProviderOperation::DistributeTemporarySecrets, Some(i))?;
            }
            for i in indexed(|p| p.temporary_committer().is_some()) {
                push(attempt, ProviderOperation::CommitTemporarySecrets, Some(i))?;
            }
        }

        for i in indexed(|p| p.rekey().is_some()) {
            push(attempt, ProviderOperation::Rekey, Some(i))?;
        }

        for i in indexed(|p| p.long_term_distributor().is_some()) {
            push(attempt, ProviderOperation::DistributeLongTermSecrets, Some(i))?;
        }
        for i in indexed(|p| p.committer().is_some()) {
            push(attempt, ProviderOperation::UnifiedCommit, Some(i))?;
        }

        if !self.options.skip_cleanup {
            for i in indexed(|p| p.cleanup().is_some()) {
                push(attempt, ProviderOperation::Cleanup, Some(i))?;
            }
        }

        Ok(steps)
    }

    async fn execute(
        &self,
        step: Step,
        provider: Option<&ProviderInstance>,
        providers: &[ProviderInstance],
        secret: &ManagedSecret,
        batches: &mut Batches,
    ) -> Result<(), ActionError> {
        let op = step.operation;
        if op == ProviderOperation::ValidateDeclaredHints {
            return check_declared_hints(providers);
        }
        let Some(p) = provider else {
            return Err(ActionError::configuration(format!("{op} has no target provider")));
        };
        let missing = || ActionError::configuration(format!("{} does not support {op}", p.provider_type()));

        match op {
            ProviderOperation::RunSanityTests => {
                let tester = p.sanity_tester().ok_or_else(missing)?;
                self.call(op, tester.run_sanity_tests()).await
            }
            ProviderOperation::GenerateTemporarySecret => {
                let generator = p.temporary_generator().ok_or_else(missing)?;
                let temporary = self.call(op, generator.generate_temporary()).await?;
                batches.temporary.push(with_declared_hint(temporary, p));
                Ok(())
            }
            ProviderOperation::DistributeTemporarySecrets => {
                let distributor = p.temporary_distributor().ok_or_else(missing)?;
                check_batch("temporary", &batches.temporary)?;
                self.call(op, distributor.distribute_temporary(&batches.temporary))
                    .await
            }
            ProviderOperation::CommitTemporarySecrets => {
                let committer = p.temporary_committer().ok_or_else(missing)?;
                self.call(op, committer.commit_temporary()).await
            }
            ProviderOperation::Rekey => {
                let rekeyable = p.rekey().ok_or_else(missing)?;
                let rotated = self.call(op, rekeyable.rekey(secret.valid_period)).await?;
                batches.long_term.push(with_declared_hint(rotated, p));
                Ok(())
            }
            ProviderOperation::DistributeLongTermSecrets => {
                let distributor = p.long_term_distributor().ok_or_else(missing)?;
                check_batch("long-term", &batches.long_term)?;
                self.call(op, distributor.distribute_long_term(&batches.long_term))
                    .await
            }
            ProviderOperation::UnifiedCommit => {
                let committer = p.committer().ok_or_else(missing)?;
                self.call(op, committer.commit()).await
            }
            ProviderOperation::Cleanup => {
                let cleanup = p.cleanup().ok_or_else(missing)?;
                self.call(op, cleanup.cleanup()).await
            }
            ProviderOperation::ValidateDeclaredHints => check_declared_hints(providers),
        }
    }

    /// Await a provider call under `call_timeout`.
    async fn call<T, F>(&self, operation: ProviderOperation, call: F) -> Result<T, ActionError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.options.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(to_action_error(err)),
            Err(_) => Err(ActionError::timeout(format!(
                "{operation} exceeded {:?}",
                self.options.call_timeout
            ))),
        }
    }
}

fn to_action_error(err: ProviderError) -> ActionError {
    match err {
        ProviderError::Timeout { .. } => ActionError::timeout(err.to_string()),
        ref e if e.is_configuration() => ActionError::configuration(e.to_string()),
        e => ActionError::provider_execution(e.to_string()),
    }
}

/// Providers that leave the hint empty get the one declared on their resource.
fn with_declared_hint(mut secret: RegeneratedSecret, provider: &ProviderInstance) -> RegeneratedSecret {
    if secret.user_hint.is_empty() && !provider.user_hint().is_empty() {
        provider.user_hint().clone_into(&mut secret.user_hint);
    }
    secret
}

fn check_declared_hints(providers: &[ProviderInstance]) -> Result<(), ActionError> {
    let rekeyed = providers
        .iter()
        .filter(|p| p.rekey().is_some())
        .map(ProviderInstance::user_hint);
    validate_hints(rekeyed)
        .map_err(|e| ActionError::duplicate_hint(format!("rekeyable providers: {e}")))?;

    let temporary = providers
        .iter()
        .filter(|p| p.temporary_generator().is_some())
        .map(ProviderInstance::user_hint);
    validate_hints(temporary)
        .map_err(|e| ActionError::duplicate_hint(format!("temporary secret providers: {e}")))
}

fn check_batch(kind: &str, batch: &[RegeneratedSecret]) -> Result<(), ActionError> {
    validate_batch(batch).map_err(|e| ActionError::duplicate_hint(format!("{kind} batch: {e}")))
}

fn publish(
    progress: Option<&watch::Sender<WorkflowActionCollection>>,
    attempt: &WorkflowActionCollection,
) {
    if let Some(tx) = progress {
        tx.send_replace(attempt.clone());
    }
}
