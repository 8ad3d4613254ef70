//! Workflow errors.
//!
//! Provider failures during a run are not errors here; they are captured in
//! the attempt log. These variants cover what stops a run from starting.

use rekey_core::{ManagedSecretId, ModelError};
use rekey_provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The secret resolved to no provider instances.
    #[error("managed secret {secret_id} has no providers")]
    NoProviders { secret_id: ManagedSecretId },

    /// Nothing would produce new secret material.
    #[error("managed secret {secret_id} has no rekeyable provider")]
    NoRekeyableProvider { secret_id: ManagedSecretId },

    /// A provider instance could not be built.
    #[error("provider setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Model(#[from] ModelError),

    /// The runner could not deliver a result.
    #[error("workflow runner failed: {reason}")]
    Runner { reason: String },
}

impl WorkflowError {
    /// `true` for errors caused by secret or provider setup.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::NoProviders { .. } | Self::NoRekeyableProvider { .. } => true,
            Self::Provider(e) => e.is_configuration(),
            Self::Model(_) | Self::Runner { .. } => false,
        }
    }
}
