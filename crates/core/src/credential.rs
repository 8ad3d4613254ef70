//! Bearer credentials and the identity-service collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::secret::{SecretString, expose};

/// Short-lived bearer credential handed to providers.
///
/// `Serialize` writes the real token; only encrypted secure storage should
/// ever serialize this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenCredential {
    /// The bearer token.
    #[serde(with = "expose")]
    pub access_token: SecretString,
    /// When the token stops being accepted.
    pub expires_at: DateTime<Utc>,
    /// Principal the token acts as (user UPN or application id).
    pub principal: String,
    /// Scopes or resource the token was issued for.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl AccessTokenCredential {
    /// Create a credential.
    pub fn new(
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        principal: impl Into<String>,
    ) -> Self {
        Self {
            access_token: SecretString::new(access_token),
            expires_at,
            principal: principal.into(),
            scopes: Vec::new(),
        }
    }

    /// Attach scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// `true` when the token is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.access_token.is_blank()
    }

    /// `true` once `now` has reached the expiry.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Failure to obtain a token from the identity service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialSourceError {
    /// No interactive user session is available for an on-behalf-of exchange.
    #[error("no signed-in user session is available")]
    NoUserSession,

    /// The identity service rejected or failed the request.
    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

/// Identity service that mints bearer credentials.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Application (service principal) credential for the given scopes.
    async fn access_token_for_application(
        &self,
        scopes: &[String],
    ) -> Result<AccessTokenCredential, CredentialSourceError>;

    /// On-behalf-of exchange using the current user's live session.
    async fn access_token_on_behalf_of_current_user(
        &self,
        resource: &str,
    ) -> Result<AccessTokenCredential, CredentialSourceError>;
}
