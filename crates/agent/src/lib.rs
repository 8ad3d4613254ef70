//! # Rekey Agent
//!
//! Relays a rotation to a separate execution context.
//!
//! The service side uses [`AgentRunner`] as its
//! [`WorkflowRunner`](rekey_workflow::WorkflowRunner). Each run becomes a
//! [`ProviderExecutionRequest`] sealed in an [`AgentMessageEnvelope`] and sent
//! over an [`AgentTransport`]. The agent side, an [`AgentExecutor`], verifies
//! the signature before decrypting anything, runs the workflow with its own
//! provider registry and seals the attempt log back to the originator.
//!
//! ```rust
//! use chrono::Utc;
//! use rekey_agent::{AgentKeys, AgentMessageEnvelope, MessageType};
//!
//! let keys = AgentKeys::generate();
//! let envelope = AgentMessageEnvelope::seal(
//!     &keys,
//!     "service",
//!     "agent-1",
//!     MessageType::ProviderExecutionRequest,
//!     &"payload",
//!     Utc::now(),
//! )
//! .unwrap();
//! assert!(envelope.verify(&keys).is_ok());
//! ```

#![forbid(unsafe_code)]

pub mod envelope;
pub mod error;
pub mod executor;
pub mod keys;
pub mod message;
pub mod runner;
pub mod transport;

pub use envelope::{AgentMessageEnvelope, OpenPolicy};
pub use error::AgentError;
pub use executor::{AgentExecutor, DEFAULT_MAX_AGE};
pub use keys::AgentKeys;
pub use message::{
    ExecutionOutcome, MessageType, ProviderExecutionRequest, ProviderExecutionResponse,
};
pub use runner::AgentRunner;
pub use transport::{AgentTransport, ChannelTransport, InProcessTransport};
