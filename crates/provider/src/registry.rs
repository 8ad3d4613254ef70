//! Static provider registry.
//!
//! Maps a provider type key to the factory that builds instances of it. The
//! registry is filled once at start-up; resources name their type and the
//! engine looks it up at execution time.

use std::sync::Arc;

use dashmap::DashMap;
use rekey_core::{AccessTokenCredential, Resource};

use crate::capability::ResourceSuggestion;
use crate::error::ProviderError;
use crate::instance::ProviderInstance;

/// Everything a factory gets to build one instance.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    /// Resource being realized. Its configuration blob belongs to the factory.
    pub resource: Resource,
    /// Credential authorizing this execution.
    pub credential: AccessTokenCredential,
}

/// Builds provider instances of one type.
pub trait ProviderFactory: Send + Sync {
    /// Create a fresh instance for `ctx.resource`.
    fn create(&self, ctx: &ProviderContext) -> Result<ProviderInstance, ProviderError>;
}

impl<F> ProviderFactory for F
where
    F: Fn(&ProviderContext) -> Result<ProviderInstance, ProviderError> + Send + Sync,
{
    fn create(&self, ctx: &ProviderContext) -> Result<ProviderInstance, ProviderError> {
        self(ctx)
    }
}

/// Thread-safe map from provider type to factory.
///
/// # Examples
///
/// ```rust
/// use rekey_provider::{ProviderInstance, ProviderRegistry};
///
/// let registry = ProviderRegistry::new();
/// registry.register_fn("noop", |ctx: &rekey_provider::ProviderContext| {
///     Ok(ProviderInstance::for_resource(&ctx.resource))
/// });
/// assert!(registry.contains("noop"));
/// ```
#[derive(Default)]
pub struct ProviderRegistry {
    factories: DashMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. Replaces any factory already under `provider_type`.
    pub fn register<F>(&self, provider_type: impl Into<String>, factory: F)
    where
        F: ProviderFactory + 'static,
    {
        let provider_type = provider_type.into();
        tracing::info!(provider_type = %provider_type, "registered provider factory");
        self.factories.insert(provider_type, Arc::new(factory));
    }

    /// Register a closure as the factory for `provider_type`.
    pub fn register_fn<F>(&self, provider_type: impl Into<String>, factory: F)
    where
        F: Fn(&ProviderContext) -> Result<ProviderInstance, ProviderError> + Send + Sync + 'static,
    {
        self.register(provider_type, factory);
    }

    pub fn get(&self, provider_type: &str) -> Result<Arc<dyn ProviderFactory>, ProviderError> {
        self.factories
            .get(provider_type)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ProviderError::UnknownType {
                provider_type: provider_type.to_owned(),
            })
    }

    #[must_use]
    pub fn contains(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    pub fn remove(&self, provider_type: &str) -> bool {
        self.factories.remove(provider_type).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Registered type keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Build one instance for `resource`.
    pub fn create(
        &self,
        resource: &Resource,
        credential: &AccessTokenCredential,
    ) -> Result<ProviderInstance, ProviderError> {
        let factory = self.get(&resource.provider_type)?;
        let ctx = ProviderContext {
            resource: resource.clone(),
            credential: credential.clone(),
        };
        factory.create(&ctx)
    }

    /// Build instances for every resource, in order. Fails on the first error.
    pub fn create_all(
        &self,
        resources: &[Resource],
        credential: &AccessTokenCredential,
    ) -> Result<Vec<ProviderInstance>, ProviderError> {
        resources
            .iter()
            .map(|resource| self.create(resource, credential))
            .collect()
    }

    /// Ask every registered type for resource candidates under `base_configuration`.
    ///
    /// Types are queried concurrently and results come back in type order.
    /// Types without a candidate enumerator are skipped. A failing type is
    /// logged and skipped.
    pub async fn enumerate_candidates(
        &self,
        credential: &AccessTokenCredential,
        base_configuration: &str,
    ) -> Vec<ResourceSuggestion> {
        let mut probes = Vec::new();
        for provider_type in self.keys() {
            let probe = Resource::new("candidate-probe", provider_type.as_str(), base_configuration);
            match self.create(&probe, credential) {
                Ok(instance) if instance.candidate_enumerator().is_some() => {
                    probes.push((provider_type, instance));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(provider_type = %provider_type, error = %e, "skipping candidate enumeration");
                }
            }
        }

        let lookups = probes.iter().filter_map(|(provider_type, instance)| {
            let enumerator = instance.candidate_enumerator()?;
            Some(async move {
                (
                    provider_type,
                    enumerator.enumerate_candidates(base_configuration).await,
                )
            })
        });

        let mut suggestions = Vec::new();
        for (provider_type, result) in futures::future::join_all(lookups).await {
            match result {
                Ok(found) => {
                    tracing::debug!(provider_type = %provider_type, count = found.len(), "enumerated candidates");
                    suggestions.extend(found);
                }
                Err(e) => {
                    tracing::warn!(provider_type = %provider_type, error = %e, "candidate enumeration failed");
                }
            }
        }
        suggestions
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("provider_types", &self.keys())
            .finish()
    }
}
