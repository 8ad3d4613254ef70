//! Provider errors.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by providers and the provider registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// No factory is registered for the type.
    #[error("unknown provider type: {provider_type}")]
    UnknownType { provider_type: String },

    /// The resource's configuration blob could not be used.
    #[error("invalid configuration for {provider_type}: {reason}")]
    InvalidConfiguration {
        provider_type: String,
        reason: String,
    },

    /// The provider refused or lacked the credential it was given.
    #[error("credential rejected: {reason}")]
    Credential { reason: String },

    /// A capability call failed.
    #[error("{reason}")]
    Execution { reason: String },

    /// A capability call did not finish in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },
}

impl ProviderError {
    /// Shorthand for [`ProviderError::Execution`].
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`ProviderError::InvalidConfiguration`].
    pub fn invalid_configuration(
        provider_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidConfiguration {
            provider_type: provider_type.into(),
            reason: reason.into(),
        }
    }

    /// `true` for errors caused by setup rather than by a failing call.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::UnknownType { .. } | Self::InvalidConfiguration { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            ProviderError::UnknownType {
                provider_type: "blob".into()
            }
            .to_string(),
            "unknown provider type: blob"
        );
        assert_eq!(
            ProviderError::Timeout {
                operation: "rekey".into(),
                timeout: Duration::from_secs(3)
            }
            .to_string(),
            "rekey timed out after 3s"
        );
        assert!(ProviderError::invalid_configuration("kv", "missing vault").is_configuration());
        assert!(!ProviderError::execution("403").is_configuration());
    }
}
