//! Capability descriptor for one configured resource.

use std::fmt;
use std::sync::Arc;

use rekey_core::{Resource, ResourceId};

use crate::capability::{
    CandidateEnumerator, Capabilities, LongTermSecretDistributor, Rekeyable, SanityTester,
    SecretCleanup, TemporarySecretDistributor, TemporarySecretGenerator, UnifiedCommitter,
    UnifiedTemporaryCommitter,
};

/// A provider realized for one resource.
///
/// Holds one optional handle per capability. The engine only calls what is
/// present; an instance with no mutating capability just takes part in sanity
/// tests.
#[derive(Clone)]
pub struct ProviderInstance {
    resource_id: ResourceId,
    provider_type: String,
    user_hint: String,
    is_rekeyable_object_provider: bool,
    rekey: Option<Arc<dyn Rekeyable>>,
    generate_temporary: Option<Arc<dyn TemporarySecretGenerator>>,
    distribute_temporary: Option<Arc<dyn TemporarySecretDistributor>>,
    commit_temporary: Option<Arc<dyn UnifiedTemporaryCommitter>>,
    distribute_long_term: Option<Arc<dyn LongTermSecretDistributor>>,
    commit: Option<Arc<dyn UnifiedCommitter>>,
    cleanup: Option<Arc<dyn SecretCleanup>>,
    sanity: Option<Arc<dyn SanityTester>>,
    candidates: Option<Arc<dyn CandidateEnumerator>>,
}

impl ProviderInstance {
    /// Empty descriptor. Capabilities are added with the `with_*` methods.
    pub fn new(resource_id: ResourceId, provider_type: impl Into<String>) -> Self {
        Self {
            resource_id,
            provider_type: provider_type.into(),
            user_hint: String::new(),
            is_rekeyable_object_provider: false,
            rekey: None,
            generate_temporary: None,
            distribute_temporary: None,
            commit_temporary: None,
            distribute_long_term: None,
            commit: None,
            cleanup: None,
            sanity: None,
            candidates: None,
        }
    }

    /// Empty descriptor carrying the resource's id, type, hint and role.
    pub fn for_resource(resource: &Resource) -> Self {
        let mut instance = Self::new(resource.id, resource.provider_type.clone());
        instance.user_hint = resource.user_hint.clone();
        instance.is_rekeyable_object_provider = resource.is_rekeyable_object_provider;
        instance
    }

    pub fn with_user_hint(mut self, hint: impl Into<String>) -> Self {
        self.user_hint = hint.into();
        self
    }

    /// Add [`Rekeyable`]. Also marks the instance as a rekeyable-object provider.
    pub fn with_rekey(mut self, p: Arc<dyn Rekeyable>) -> Self {
        self.rekey = Some(p);
        self.is_rekeyable_object_provider = true;
        self
    }

    pub fn with_temporary_generator(mut self, p: Arc<dyn TemporarySecretGenerator>) -> Self {
        self.generate_temporary = Some(p);
        self
    }

    pub fn with_temporary_distributor(mut self, p: Arc<dyn TemporarySecretDistributor>) -> Self {
        self.distribute_temporary = Some(p);
        self
    }

    pub fn with_temporary_committer(mut self, p: Arc<dyn UnifiedTemporaryCommitter>) -> Self {
        self.commit_temporary = Some(p);
        self
    }

    pub fn with_long_term_distributor(mut self, p: Arc<dyn LongTermSecretDistributor>) -> Self {
        self.distribute_long_term = Some(p);
        self
    }

    pub fn with_committer(mut self, p: Arc<dyn UnifiedCommitter>) -> Self {
        self.commit = Some(p);
        self
    }

    pub fn with_cleanup(mut self, p: Arc<dyn SecretCleanup>) -> Self {
        self.cleanup = Some(p);
        self
    }

    pub fn with_sanity_tester(mut self, p: Arc<dyn SanityTester>) -> Self {
        self.sanity = Some(p);
        self
    }

    pub fn with_candidate_enumerator(mut self, p: Arc<dyn CandidateEnumerator>) -> Self {
        self.candidates = Some(p);
        self
    }

    #[must_use]
    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    #[must_use]
    pub fn provider_type(&self) -> &str {
        &self.provider_type
    }

    /// Hint declared for secrets this instance produces.
    #[must_use]
    pub fn user_hint(&self) -> &str {
        &self.user_hint
    }

    #[must_use]
    pub fn is_rekeyable_object_provider(&self) -> bool {
        self.is_rekeyable_object_provider
    }

    /// Capability tag set.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::empty();
        caps.set(Capabilities::REKEY, self.rekey.is_some());
        caps.set(Capabilities::GENERATE_TEMPORARY, self.generate_temporary.is_some());
        caps.set(Capabilities::DISTRIBUTE_TEMPORARY, self.distribute_temporary.is_some());
        caps.set(Capabilities::COMMIT_TEMPORARY, self.commit_temporary.is_some());
        caps.set(Capabilities::DISTRIBUTE_LONG_TERM, self.distribute_long_term.is_some());
        caps.set(Capabilities::COMMIT, self.commit.is_some());
        caps.set(Capabilities::CLEANUP, self.cleanup.is_some());
        caps.set(Capabilities::SANITY_TEST, self.sanity.is_some());
        caps.set(Capabilities::ENUMERATE_CANDIDATES, self.candidates.is_some());
        caps
    }

    /// `true` if the instance only supports read-only calls.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        !self.capabilities().intersects(Capabilities::MUTATING)
    }

    #[must_use]
    pub fn rekey(&self) -> Option<&dyn Rekeyable> {
        self.rekey.as_deref()
    }

    #[must_use]
    pub fn temporary_generator(&self) -> Option<&dyn TemporarySecretGenerator> {
        self.generate_temporary.as_deref()
    }

    #[must_use]
    pub fn temporary_distributor(&self) -> Option<&dyn TemporarySecretDistributor> {
        self.distribute_temporary.as_deref()
    }

    #[must_use]
    pub fn temporary_committer(&self) -> Option<&dyn UnifiedTemporaryCommitter> {
        self.commit_temporary.as_deref()
    }

    #[must_use]
    pub fn long_term_distributor(&self) -> Option<&dyn LongTermSecretDistributor> {
        self.distribute_long_term.as_deref()
    }

    #[must_use]
    pub fn committer(&self) -> Option<&dyn UnifiedCommitter> {
        self.commit.as_deref()
    }

    #[must_use]
    pub fn cleanup(&self) -> Option<&dyn SecretCleanup> {
        self.cleanup.as_deref()
    }

    #[must_use]
    pub fn sanity_tester(&self) -> Option<&dyn SanityTester> {
        self.sanity.as_deref()
    }

    #[must_use]
    pub fn candidate_enumerator(&self) -> Option<&dyn CandidateEnumerator> {
        self.candidates.as_deref()
    }
}

impl fmt::Debug for ProviderInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderInstance")
            .field("resource_id", &self.resource_id)
            .field("provider_type", &self.provider_type)
            .field("user_hint", &self.user_hint)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
