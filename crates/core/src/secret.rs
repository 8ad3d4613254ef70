//! Secret string type with automatic zeroization
//!
//! [`SecretString`] is the only type that carries key material, passwords or
//! bearer tokens through the rekeying pipeline. The value is only reachable
//! inside a closure passed to [`SecretString::expose_secret`], it is redacted
//! in `Debug`, `Display` and the default `Serialize` impl, and the backing
//! memory is zeroed on drop.
//!
//! Persisting a secret on purpose (into encrypted storage) goes through the
//! [`expose`] serde adapter.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Secret string with automatic memory zeroization
///
/// # Examples
///
/// ```
/// use rekey_core::SecretString;
///
/// let secret = SecretString::new("my-api-key");
/// let len = secret.expose_secret(|value| value.len());
/// assert_eq!(len, 10);
/// assert_eq!(format!("{secret:?}"), "[REDACTED]");
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString {
    inner: String,
}

impl SecretString {
    /// Creates a new secret from any string-like value
    pub fn new<S: Into<String>>(s: S) -> Self {
        Self { inner: s.into() }
    }

    /// Accesses secret value within a closure scope
    pub fn expose_secret<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&str) -> R,
    {
        f(&self.inner)
    }

    /// Returns the length without exposing content
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Checks if empty without exposing content
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Checks if empty or whitespace-only without exposing content
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.inner.trim().is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

// Serialize as redacted so secrets never leak through logs or events.
impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString::new)
    }
}

/// Serde adapter that writes the real value.
///
/// Only for fields that end up inside an encrypted payload:
///
/// ```ignore
/// #[serde(with = "rekey_core::secret::expose")]
/// access_token: SecretString,
/// ```
pub mod expose {
    use super::SecretString;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize the exposed value.
    pub fn serialize<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        secret.expose_secret(|value| serializer.serialize_str(value))
    }

    /// Deserialize from a plain string.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_string_debug() {
        let secret = SecretString::new("super_secret_password");
        let debug_str = format!("{secret:?}");
        assert_eq!(debug_str, "[REDACTED]");
        assert!(!debug_str.contains("super_secret"));
    }

    #[test]
    fn test_secret_string_serialize_redacted() {
        let secret = SecretString::new("should_be_redacted");
        let json = serde_json::to_string(&secret).unwrap();
        assert_eq!(json, "\"[REDACTED]\"");
    }

    #[test]
    fn test_blank_detection() {
        assert!(SecretString::new("   ").is_blank());
        assert!(SecretString::new("").is_blank());
        assert!(!SecretString::new(" x ").is_blank());
    }

    #[derive(Serialize, Deserialize)]
    struct Sealed {
        #[serde(with = "expose")]
        token: SecretString,
    }

    #[test]
    fn test_expose_adapter_writes_value() {
        let sealed = Sealed {
            token: SecretString::new("abc"),
        };
        let json = serde_json::to_string(&sealed).unwrap();
        assert_eq!(json, r#"{"token":"abc"}"#);

        let back: Sealed = serde_json::from_str(&json).unwrap();
        back.token.expose_secret(|v| assert_eq!(v, "abc"));
    }
}
