//! # Rekey Provider
//!
//! Capability model for the plugins that own or consume secret material.
//!
//! A configured [`Resource`](rekey_core::Resource) becomes a
//! [`ProviderInstance`]: a descriptor holding one optional handle per
//! capability. The rotation engine asks the descriptor which capabilities are
//! present before each phase, so a plugin implements only the traits that make
//! sense for it.
//!
//! Provider types are looked up in a [`ProviderRegistry`] populated at start-up.
//! Instances are built fresh for every task execution.

#![forbid(unsafe_code)]

pub mod capability;
pub mod error;
pub mod instance;
pub mod registry;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use capability::{
    CandidateEnumerator, Capabilities, LongTermSecretDistributor, Rekeyable, ResourceSuggestion,
    SanityTester, SecretCleanup, TemporarySecretDistributor, TemporarySecretGenerator,
    UnifiedCommitter, UnifiedTemporaryCommitter,
};
pub use error::ProviderError;
pub use instance::ProviderInstance;
pub use registry::{ProviderContext, ProviderFactory, ProviderRegistry};
