use thiserror::Error;

/// Logger setup failures.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid filter directive '{directive}': {reason}")]
    Filter { directive: String, reason: String },

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

pub type LogResult<T> = Result<T, LogError>;
