//! Configured provider instances.

use serde::{Deserialize, Serialize};

use crate::id::ResourceId;

/// A configured provider: either the owner of secret material or a consumer of it.
///
/// `provider_configuration` is opaque here. Only the provider registered under
/// `provider_type` ever parses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Identifier.
    pub id: ResourceId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Registry key of the provider implementation.
    pub provider_type: String,
    /// Provider-owned serialized configuration.
    #[serde(default)]
    pub provider_configuration: String,
    /// `true` when this resource owns secret material.
    #[serde(default)]
    pub is_rekeyable_object_provider: bool,
    /// Hint attached to every secret this resource produces.
    #[serde(default)]
    pub user_hint: String,
}

impl Resource {
    /// Create a resource with a fresh id.
    pub fn new(
        name: impl Into<String>,
        provider_type: impl Into<String>,
        provider_configuration: impl Into<String>,
    ) -> Self {
        Self {
            id: ResourceId::v4(),
            name: name.into(),
            description: String::new(),
            provider_type: provider_type.into(),
            provider_configuration: provider_configuration.into(),
            is_rekeyable_object_provider: false,
            user_hint: String::new(),
        }
    }

    /// Mark as a rekeyable-object provider.
    #[must_use]
    pub fn rekeyable(mut self) -> Self {
        self.is_rekeyable_object_provider = true;
        self
    }

    /// Set the declared user hint.
    #[must_use]
    pub fn with_user_hint(mut self, hint: impl Into<String>) -> Self {
        self.user_hint = hint.into();
        self
    }
}
