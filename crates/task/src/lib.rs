//! # Rekey Task
//!
//! The rekeying task lifecycle on top of the workflow engine and datastore.
//!
//! ```text
//! Created ─┬─> PendingApproval ─┬─> Scheduled ─┐
//!          ├────────────────────┼─> Triggered ─┼─> InProgress ─┬─> Completed
//!          └────────────────────┘              │               └─> Failed ─> (retry)
//!                                              └─> Expired
//! ```
//!
//! - [`TaskExecutor`]: creates, approves and executes tasks, acquiring the
//!   credential each confirmation strategy calls for.
//! - [`TaskExecutor::external_signal`]: nonce-authenticated rotation requests
//!   with a bounded caller wait.
//! - [`Scanner`]: periodic task creation for expiring secrets and execution of
//!   due tasks.
//! - [`RekeyConfig`]: service configuration from TOML and `REKEY_*` variables.

#![forbid(unsafe_code)]

pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod executor;
pub mod scanner;
pub mod service;
pub mod signal;

pub use config::{ConfigError, RekeyConfig};
pub use credentials::CredentialBroker;
pub use error::{ErrorCategory, TaskError};
pub use events::{
    BroadcastDispatcher, EventDispatcher, FanOutDispatcher, LoggingDispatcher,
    RecordingDispatcher, RekeyEvent,
};
pub use executor::{ExecutorSettings, TaskExecutor};
pub use scanner::{ScanReport, Scanner};
pub use service::{RekeyService, ServiceParts};
pub use signal::SignalOutcome;
