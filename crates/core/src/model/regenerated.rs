use chrono::{DateTime, Utc};

use crate::secret::SecretString;

/// Output of a rekey or temporary-secret call.
///
/// Holds live secret material and is never serialized or persisted.
#[derive(Debug, Clone)]
pub struct RegeneratedSecret {
    /// Distinguishes several secrets yielded by one provider in one batch.
    pub user_hint: String,
    /// The new secret value.
    pub new_secret_value: SecretString,
    /// Connection string built around the new value, if the provider has one.
    pub new_connection_string: Option<SecretString>,
    /// When the new value stops being valid.
    pub expiry: DateTime<Utc>,
}

impl RegeneratedSecret {
    /// Secret with an empty hint and no connection string.
    pub fn new(value: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        Self {
            user_hint: String::new(),
            new_secret_value: SecretString::new(value),
            new_connection_string: None,
            expiry,
        }
    }

    #[must_use]
    pub fn with_user_hint(mut self, hint: impl Into<String>) -> Self {
        self.user_hint = hint.into();
        self
    }

    #[must_use]
    pub fn with_connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.new_connection_string = Some(SecretString::new(connection_string));
        self
    }
}
