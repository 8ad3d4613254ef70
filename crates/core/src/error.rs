//! Model-level errors.

use thiserror::Error;

use crate::model::TaskState;

/// Errors raised by model invariants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A task state change that the lifecycle does not allow.
    #[error("invalid task transition from {from} to {to}")]
    InvalidTransition {
        /// State the task was in.
        from: TaskState,
        /// State that was requested.
        to: TaskState,
    },

    /// The attempt log was already sealed.
    #[error("attempt {0} is sealed and can no longer be modified")]
    AttemptSealed(crate::AttemptId),

    /// An action index outside the planned action list.
    #[error("action index {index} out of range ({len} actions planned)")]
    ActionOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of planned actions.
        len: usize,
    },
}
