//! Rekeying data model.

mod attempt;
mod regenerated;
mod resource;
mod secret;
mod task;

pub use attempt::{
    ActionError, ActionErrorKind, ActionLogEntry, ActionOutcome, AttemptStatus, LogLevel,
    ProviderOperation, WorkflowAction, WorkflowActionCollection, WorkflowPhase,
};
pub use regenerated::RegeneratedSecret;
pub use resource::Resource;
pub use secret::{ConfirmationStrategies, ManagedSecret, ValidityRisk};
pub use task::{
    ConfirmationStrategy, PersistedCredential, RekeyingTask, TaskState, can_transition_task,
};
