//! User-hint batch rules.
//!
//! A consumer receiving several secrets in one call tells them apart by hint.
//! A batch of more than one secret therefore needs every hint to be present
//! and distinct. A single secret needs no hint.

use std::collections::HashSet;

use rekey_core::RegeneratedSecret;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HintError {
    #[error("batch of {count} secrets contains a secret without a user hint")]
    Missing { count: usize },

    #[error("user hint '{hint}' appears more than once in one batch")]
    Duplicate { hint: String },
}

/// Check a batch given by its hints.
pub fn validate_hints<'a, I>(hints: I) -> Result<(), HintError>
where
    I: IntoIterator<Item = &'a str>,
{
    let hints: Vec<&str> = hints.into_iter().collect();
    if hints.len() <= 1 {
        return Ok(());
    }
    if hints.iter().any(|h| h.trim().is_empty()) {
        return Err(HintError::Missing { count: hints.len() });
    }
    let mut seen = HashSet::with_capacity(hints.len());
    for hint in hints {
        if !seen.insert(hint) {
            return Err(HintError::Duplicate {
                hint: hint.to_owned(),
            });
        }
    }
    Ok(())
}

/// Check a batch of secrets.
pub fn validate_batch(secrets: &[RegeneratedSecret]) -> Result<(), HintError> {
    validate_hints(secrets.iter().map(|s| s.user_hint.as_str()))
}
