//! # Rekey Storage
//!
//! Persistence for the rekeying model.
//!
//! - [`BlobStore`]: the backend contract, one named blob per entity collection
//!   plus an advisory lease tag next to it. [`MemoryBlobStore`] and
//!   [`FileBlobStore`] implement it.
//! - [`LeaseCoordinator`]: serializes read-modify-write cycles on a collection
//!   between cooperating writers.
//! - [`EntityStore`]: typed CRUD over one collection; [`Datastore`] bundles the
//!   three the service uses.
//! - [`SecureStorage`]: encrypted, expiring entries for cached credentials,
//!   implemented by [`EncryptedSecureStorage`].
//!
//! Leases are advisory. They keep honest writers from clobbering each other on
//! plain blob storage; they are not a consensus protocol.

#![forbid(unsafe_code)]

pub mod blob;
pub mod datastore;
pub mod entity;
pub mod error;
pub mod lease;
pub mod secure;

pub use blob::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use datastore::Datastore;
pub use entity::{Entity, EntityStore, Insert};
pub use error::StoreError;
pub use lease::{FixedJitter, Jitter, LeaseCoordinator, LeasePolicy, RandomJitter};
pub use secure::{EncryptedSecureStorage, SecureStorage, SecureStorageExt};
