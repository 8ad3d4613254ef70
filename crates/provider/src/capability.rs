//! Capability traits.
//!
//! Each trait is one independent role. A provider implements any subset and
//! registers the ones it has on its [`ProviderInstance`](crate::ProviderInstance).

use std::time::Duration;

use async_trait::async_trait;
use bitflags::bitflags;
use rekey_core::{RegeneratedSecret, Resource};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Produces new secret material by mutating the resource.
#[async_trait]
pub trait Rekeyable: Send + Sync {
    /// Rotate the primary credential.
    ///
    /// `requested_valid_period` is advisory. The provider reports the real
    /// expiry in the returned secret.
    async fn rekey(
        &self,
        requested_valid_period: Duration,
    ) -> Result<RegeneratedSecret, ProviderError>;
}

/// Returns an already-valid alternate secret without touching production state.
#[async_trait]
pub trait TemporarySecretGenerator: Send + Sync {
    async fn generate_temporary(&self) -> Result<RegeneratedSecret, ProviderError>;
}

/// Stages temporary secrets in a consumer.
#[async_trait]
pub trait TemporarySecretDistributor: Send + Sync {
    async fn distribute_temporary(&self, secrets: &[RegeneratedSecret])
    -> Result<(), ProviderError>;
}

/// Switches a consumer over to its staged temporary secrets in one step.
#[async_trait]
pub trait UnifiedTemporaryCommitter: Send + Sync {
    async fn commit_temporary(&self) -> Result<(), ProviderError>;
}

/// Writes rekeyed secrets into a consumer's durable configuration.
#[async_trait]
pub trait LongTermSecretDistributor: Send + Sync {
    async fn distribute_long_term(&self, secrets: &[RegeneratedSecret])
    -> Result<(), ProviderError>;
}

/// Switches a consumer over to its long-term secrets in one step.
#[async_trait]
pub trait UnifiedCommitter: Send + Sync {
    async fn commit(&self) -> Result<(), ProviderError>;
}

/// Retires or scrambles material that is no longer in use.
#[async_trait]
pub trait SecretCleanup: Send + Sync {
    async fn cleanup(&self) -> Result<(), ProviderError>;
}

/// Read-only reachability and validity check.
#[async_trait]
pub trait SanityTester: Send + Sync {
    async fn run_sanity_tests(&self) -> Result<(), ProviderError>;
}

/// Discovers resources this provider type could manage.
#[async_trait]
pub trait CandidateEnumerator: Send + Sync {
    async fn enumerate_candidates(
        &self,
        base_configuration: &str,
    ) -> Result<Vec<ResourceSuggestion>, ProviderError>;
}

bitflags! {
    /// Capabilities present on a provider instance.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u16 {
        const REKEY = 1 << 0;
        const GENERATE_TEMPORARY = 1 << 1;
        const DISTRIBUTE_TEMPORARY = 1 << 2;
        const COMMIT_TEMPORARY = 1 << 3;
        const DISTRIBUTE_LONG_TERM = 1 << 4;
        const COMMIT = 1 << 5;
        const CLEANUP = 1 << 6;
        const SANITY_TEST = 1 << 7;
        const ENUMERATE_CANDIDATES = 1 << 8;
    }
}

impl Capabilities {
    /// Capabilities that change provider-side state during rotation.
    pub const MUTATING: Self = Self::REKEY
        .union(Self::DISTRIBUTE_TEMPORARY)
        .union(Self::COMMIT_TEMPORARY)
        .union(Self::DISTRIBUTE_LONG_TERM)
        .union(Self::COMMIT)
        .union(Self::CLEANUP);

    /// Capabilities of a secret consumer.
    pub const CONSUMER: Self = Self::DISTRIBUTE_TEMPORARY
        .union(Self::COMMIT_TEMPORARY)
        .union(Self::DISTRIBUTE_LONG_TERM)
        .union(Self::COMMIT);
}

/// A discovered resource, ready to be turned into configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSuggestion {
    pub provider_type: String,
    pub name: String,
    pub provider_configuration: String,
    #[serde(default)]
    pub is_rekeyable_object_provider: bool,
}

impl ResourceSuggestion {
    /// Build a resource from this suggestion.
    #[must_use]
    pub fn into_resource(self) -> Resource {
        let resource = Resource::new(self.name, self.provider_type, self.provider_configuration);
        if self.is_rekeyable_object_provider {
            resource.rekeyable()
        } else {
            resource
        }
    }
}
