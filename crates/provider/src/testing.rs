//! Scripted providers for tests.
//!
//! [`ScriptedProvider`] implements every capability trait, records each call
//! in a shared [`CallJournal`], and can be told to fail or stall on chosen
//! operations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rekey_core::{ProviderOperation, RegeneratedSecret, ResourceId, to_delta};

use crate::capability::{
    CandidateEnumerator, Capabilities, LongTermSecretDistributor, Rekeyable, ResourceSuggestion,
    SanityTester, SecretCleanup, TemporarySecretDistributor, TemporarySecretGenerator,
    UnifiedCommitter, UnifiedTemporaryCommitter,
};
use crate::error::ProviderError;
use crate::instance::ProviderInstance;

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Global call order across every provider sharing the journal.
    pub seq: usize,
    pub resource_id: ResourceId,
    pub operation: ProviderOperation,
    /// Hints of the batch handed to a distribute call.
    pub hints: Vec<String>,
}

/// Shared, ordered record of provider calls.
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl CallJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, resource_id: ResourceId, operation: ProviderOperation, hints: Vec<String>) {
        let mut entries = self.entries.lock();
        let seq = entries.len();
        entries.push(JournalEntry {
            seq,
            resource_id,
            operation,
            hints,
        });
    }

    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Operations called on one resource, in order.
    #[must_use]
    pub fn operations_for(&self, resource_id: ResourceId) -> Vec<ProviderOperation> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.resource_id == resource_id)
            .map(|e| e.operation)
            .collect()
    }

    /// How many times `operation` was called across all providers.
    #[must_use]
    pub fn count(&self, operation: ProviderOperation) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.operation == operation)
            .count()
    }

    /// `true` if any mutating call was made.
    #[must_use]
    pub fn any_mutation(&self) -> bool {
        self.entries.lock().iter().any(|e| e.operation.is_mutating())
    }
}

/// Provider whose behavior is fixed at construction.
#[derive(Debug)]
pub struct ScriptedProvider {
    resource_id: ResourceId,
    provider_type: String,
    journal: CallJournal,
    capabilities: Capabilities,
    user_hint: String,
    failing: Vec<ProviderOperation>,
    delays: HashMap<ProviderOperation, Duration>,
    suggestions: Vec<ResourceSuggestion>,
}

impl ScriptedProvider {
    /// A provider with no capabilities selected yet.
    pub fn new(resource_id: ResourceId, journal: CallJournal) -> Self {
        Self {
            resource_id,
            provider_type: "scripted".to_owned(),
            journal,
            capabilities: Capabilities::SANITY_TEST,
            user_hint: String::new(),
            failing: Vec::new(),
            delays: HashMap::new(),
            suggestions: Vec::new(),
        }
    }

    /// Owner of secret material: rekey, temporary secret, cleanup, sanity test.
    #[must_use]
    pub fn rekeyable(mut self, provider_type: &str) -> Self {
        provider_type.clone_into(&mut self.provider_type);
        self.capabilities = Capabilities::REKEY
            | Capabilities::GENERATE_TEMPORARY
            | Capabilities::CLEANUP
            | Capabilities::SANITY_TEST;
        self
    }

    /// Consumer of secret material: both distribute/commit pairs and sanity test.
    #[must_use]
    pub fn consumer(mut self, provider_type: &str) -> Self {
        provider_type.clone_into(&mut self.provider_type);
        self.capabilities = Capabilities::CONSUMER | Capabilities::SANITY_TEST;
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_hint(mut self, hint: &str) -> Self {
        hint.clone_into(&mut self.user_hint);
        self
    }

    /// Return an error from `operation`.
    #[must_use]
    pub fn failing_on(mut self, operation: ProviderOperation) -> Self {
        self.failing.push(operation);
        self
    }

    /// Sleep before `operation` returns.
    #[must_use]
    pub fn delayed(mut self, operation: ProviderOperation, delay: Duration) -> Self {
        self.delays.insert(operation, delay);
        self
    }

    #[must_use]
    pub fn with_suggestions(mut self, suggestions: Vec<ResourceSuggestion>) -> Self {
        self.suggestions = suggestions;
        self.capabilities |= Capabilities::ENUMERATE_CANDIDATES;
        self
    }

    /// Wrap into a descriptor exposing the selected capabilities.
    #[must_use]
    pub fn into_instance(self) -> ProviderInstance {
        let caps = self.capabilities;
        let hint = self.user_hint.clone();
        let mut instance = ProviderInstance::new(self.resource_id, self.provider_type.clone())
            .with_user_hint(hint);
        let me = Arc::new(self);
        if caps.contains(Capabilities::REKEY) {
            instance = instance.with_rekey(me.clone());
        }
        if caps.contains(Capabilities::GENERATE_TEMPORARY) {
            instance = instance.with_temporary_generator(me.clone());
        }
        if caps.contains(Capabilities::DISTRIBUTE_TEMPORARY) {
            instance = instance.with_temporary_distributor(me.clone());
        }
        if caps.contains(Capabilities::COMMIT_TEMPORARY) {
            instance = instance.with_temporary_committer(me.clone());
        }
        if caps.contains(Capabilities::DISTRIBUTE_LONG_TERM) {
            instance = instance.with_long_term_distributor(me.clone());
        }
        if caps.contains(Capabilities::COMMIT) {
            instance = instance.with_committer(me.clone());
        }
        if caps.contains(Capabilities::CLEANUP) {
            instance = instance.with_cleanup(me.clone());
        }
        if caps.contains(Capabilities::SANITY_TEST) {
            instance = instance.with_sanity_tester(me.clone());
        }
        if caps.contains(Capabilities::ENUMERATE_CANDIDATES) {
            instance = instance.with_candidate_enumerator(me);
        }
        instance
    }

    async fn call(
        &self,
        operation: ProviderOperation,
        hints: Vec<String>,
    ) -> Result<(), ProviderError> {
        self.journal.record(self.resource_id, operation, hints);
        if let Some(delay) = self.delays.get(&operation) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&operation) {
            return Err(ProviderError::execution(format!(
                "scripted failure in {operation}"
            )));
        }
        Ok(())
    }

    fn secret(&self, kind: &str, valid_for: Duration) -> RegeneratedSecret {
        let expiry = Utc::now()
            .checked_add_signed(to_delta(valid_for))
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);
        RegeneratedSecret::new(format!("{}-{}-{kind}", self.provider_type, self.resource_id), expiry)
            .with_user_hint(self.user_hint.clone())
    }
}

fn hints(secrets: &[RegeneratedSecret]) -> Vec<String> {
    secrets.iter().map(|s| s.user_hint.clone()).collect()
}

#[async_trait]
impl Rekeyable for ScriptedProvider {
    async fn rekey(
        &self,
        requested_valid_period: Duration,
    ) -> Result<RegeneratedSecret, ProviderError> {
        self.call(ProviderOperation::Rekey, Vec::new()).await?;
        Ok(self.secret("rekeyed", requested_valid_period))
    }
}

#[async_trait]
impl TemporarySecretGenerator for ScriptedProvider {
    async fn generate_temporary(&self) -> Result<RegeneratedSecret, ProviderError> {
        self.call(ProviderOperation::GenerateTemporarySecret, Vec::new())
            .await?;
        Ok(self.secret("temporary", Duration::from_secs(24 * 3600)))
    }
}

#[async_trait]
impl TemporarySecretDistributor for ScriptedProvider {
    async fn distribute_temporary(
        &self,
        secrets: &[RegeneratedSecret],
    ) -> Result<(), ProviderError> {
        self.call(ProviderOperation::DistributeTemporarySecrets, hints(secrets))
            .await
    }
}

#[async_trait]
impl UnifiedTemporaryCommitter for ScriptedProvider {
    async fn commit_temporary(&self) -> Result<(), ProviderError> {
        self.call(ProviderOperation::CommitTemporarySecrets, Vec::new())
            .await
    }
}

#[async_trait]
impl LongTermSecretDistributor for ScriptedProvider {
    async fn distribute_long_term(
        &self,
        secrets: &[RegeneratedSecret],
    ) -> Result<(), ProviderError> {
        self.call(ProviderOperation::DistributeLongTermSecrets, hints(secrets))
            .await
    }
}

#[async_trait]
impl UnifiedCommitter for ScriptedProvider {
    async fn commit(&self) -> Result<(), ProviderError> {
        self.call(ProviderOperation::UnifiedCommit, Vec::new()).await
    }
}

#[async_trait]
impl SecretCleanup for ScriptedProvider {
    async fn cleanup(&self) -> Result<(), ProviderError> {
        self.call(ProviderOperation::Cleanup, Vec::new()).await
    }
}

#[async_trait]
impl SanityTester for ScriptedProvider {
    async fn run_sanity_tests(&self) -> Result<(), ProviderError> {
        self.call(ProviderOperation::RunSanityTests, Vec::new()).await
    }
}

#[async_trait]
impl CandidateEnumerator for ScriptedProvider {
    async fn enumerate_candidates(
        &self,
        _base_configuration: &str,
    ) -> Result<Vec<ResourceSuggestion>, ProviderError> {
        Ok(self.suggestions.clone())
    }
}
