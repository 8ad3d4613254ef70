//! # Rekey Core
//!
//! Model types shared by every rekeying crate.
//!
//! ## Key Components
//!
//! - **Identifiers**: [`ManagedSecretId`], [`ResourceId`], [`RekeyingTaskId`], [`AttemptId`], [`SecureEntryId`]
//! - **Model**: [`ManagedSecret`], [`Resource`], [`RekeyingTask`], [`RegeneratedSecret`]
//! - **Attempt log**: [`WorkflowActionCollection`] and its [`WorkflowAction`] records
//! - **Task lifecycle**: [`TaskState`] with validated transitions
//! - **Credentials**: [`AccessTokenCredential`] and the [`IdentityService`] collaborator
//! - **Crypto**: [`EncryptionKey`] (AES-256-GCM) for material at rest and in transit
//! - **Time**: the [`Clock`] seam ([`SystemClock`], [`ManualClock`])
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use rekey_core::{ConfirmationStrategies, ManagedSecret};
//!
//! let secret = ManagedSecret::new("storage-account-key", Duration::from_secs(24 * 3600))
//!     .with_confirmations(ConfirmationStrategies::EXTERNAL_SIGNAL);
//! assert!(secret.last_changed.is_none());
//! ```

#![forbid(unsafe_code)]

pub mod clock;
pub mod credential;
pub mod crypto;
pub mod error;
pub mod id;
pub mod model;
pub mod secret;

pub use clock::{Clock, ManualClock, SystemClock, to_delta};
pub use credential::{AccessTokenCredential, CredentialSourceError, IdentityService};
pub use crypto::{EncryptionError, EncryptionKey};
pub use error::ModelError;
pub use id::*;
pub use model::{
    ActionError, ActionErrorKind, ActionLogEntry, ActionOutcome, AttemptStatus,
    ConfirmationStrategies, ConfirmationStrategy, LogLevel, ManagedSecret, PersistedCredential,
    ProviderOperation, RegeneratedSecret, RekeyingTask, Resource, TaskState, ValidityRisk,
    WorkflowAction, WorkflowActionCollection, WorkflowPhase, can_transition_task,
};
pub use secret::SecretString;
