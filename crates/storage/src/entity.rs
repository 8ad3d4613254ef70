//! Typed collections.
//!
//! Each entity type lives in one blob holding a JSON array of records. Reads
//! go straight to the blob; every write runs under the collection's lease.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use rekey_core::{
    ManagedSecret, ManagedSecretId, RekeyingTask, RekeyingTaskId, Resource, ResourceId,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::lease::LeaseCoordinator;

/// A record kept in an [`EntityStore`].
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Blob name of the collection.
    const COLLECTION: &'static str;
    /// Human-readable kind used in errors.
    const KIND: &'static str;

    type Id: Copy + Eq + fmt::Display + Send + Sync + 'static;

    fn id(&self) -> Self::Id;
}

impl Entity for ManagedSecret {
    const COLLECTION: &'static str = "managed_secrets";
    const KIND: &'static str = "managed secret";
    type Id = ManagedSecretId;

    fn id(&self) -> ManagedSecretId {
        self.id
    }
}

impl Entity for Resource {
    const COLLECTION: &'static str = "resources";
    const KIND: &'static str = "resource";
    type Id = ResourceId;

    fn id(&self) -> ResourceId {
        self.id
    }
}

impl Entity for RekeyingTask {
    const COLLECTION: &'static str = "rekeying_tasks";
    const KIND: &'static str = "rekeying task";
    type Id = RekeyingTaskId;

    fn id(&self) -> RekeyingTaskId {
        self.id
    }
}

/// CRUD over one collection of `T`.
pub struct EntityStore<T> {
    lease: Arc<LeaseCoordinator>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityStore<T> {
    fn clone(&self) -> Self {
        Self {
            lease: Arc::clone(&self.lease),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for EntityStore<T>
where
    T: Entity,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("collection", &T::COLLECTION)
            .finish_non_exhaustive()
    }
}

/// Result of [`EntityStore::create_unless`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insert<T> {
    /// The record was stored.
    Created(T),
    /// An existing record matched; nothing was stored.
    Conflict(T),
}

fn decode<T: Entity>(bytes: Option<Vec<u8>>) -> Result<Vec<T>, StoreError> {
    match bytes {
        Some(b) if !b.is_empty() => Ok(serde_json::from_slice(&b)?),
        _ => Ok(Vec::new()),
    }
}

fn encode<T: Entity>(items: &[T]) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(items)?)
}

impl<T: Entity> EntityStore<T> {
    pub fn new(lease: Arc<LeaseCoordinator>) -> Self {
        Self {
            lease,
            _marker: PhantomData,
        }
    }

    /// Every record in the collection.
    pub async fn list(&self) -> Result<Vec<T>, StoreError> {
        decode(self.lease.read(T::COLLECTION).await?)
    }

    pub async fn find(&self, id: T::Id) -> Result<Option<T>, StoreError> {
        Ok(self.list().await?.into_iter().find(|t| t.id() == id))
    }

    /// Like [`find`](Self::find) but a missing record is an error.
    pub async fn get(&self, id: T::Id) -> Result<T, StoreError> {
        self.find(id)
            .await?
            .ok_or_else(|| StoreError::not_found(T::KIND, id))
    }

    /// Insert a new record. Fails if one with the same id exists.
    pub async fn create(&self, item: T) -> Result<T, StoreError> {
        let id = item.id();
        self.lease
            .mutate(T::COLLECTION, move |bytes| {
                let mut items: Vec<T> = decode(bytes)?;
                if items.iter().any(|t| t.id() == id) {
                    return Err(StoreError::AlreadyExists {
                        kind: T::KIND,
                        id: id.to_string(),
                    });
                }
                items.push(item.clone());
                Ok((Some(encode(&items)?), item))
            })
            .await
    }

    /// Insert `item` unless a record matching `conflicts` is already stored.
    ///
    /// The check and the insert run under one lease, so concurrent callers
    /// cannot both pass the check. A conflict writes nothing and hands back the
    /// stored record.
    pub async fn create_unless<P>(&self, item: T, conflicts: P) -> Result<Insert<T>, StoreError>
    where
        P: Fn(&T) -> bool + Send,
    {
        let id = item.id();
        self.lease
            .mutate(T::COLLECTION, move |bytes| {
                let mut items: Vec<T> = decode(bytes)?;
                if let Some(existing) = items.iter().find(|t| conflicts(t)) {
                    return Ok((None, Insert::Conflict(existing.clone())));
                }
                if items.iter().any(|t| t.id() == id) {
                    return Err(StoreError::AlreadyExists {
                        kind: T::KIND,
                        id: id.to_string(),
                    });
                }
                items.push(item.clone());
                Ok((Some(encode(&items)?), Insert::Created(item)))
            })
            .await
    }

    /// Replace an existing record.
    pub async fn update(&self, item: T) -> Result<T, StoreError> {
        let id = item.id();
        self.lease
            .mutate(T::COLLECTION, move |bytes| {
                let mut items: Vec<T> = decode(bytes)?;
                let slot = items
                    .iter_mut()
                    .find(|t| t.id() == id)
                    .ok_or_else(|| StoreError::not_found(T::KIND, id))?;
                *slot = item.clone();
                Ok((Some(encode(&items)?), item))
            })
            .await
    }

    /// Insert or replace.
    pub async fn upsert(&self, item: T) -> Result<T, StoreError> {
        let id = item.id();
        self.lease
            .mutate(T::COLLECTION, move |bytes| {
                let mut items: Vec<T> = decode(bytes)?;
                match items.iter_mut().find(|t| t.id() == id) {
                    Some(slot) => *slot = item.clone(),
                    None => items.push(item.clone()),
                }
                Ok((Some(encode(&items)?), item))
            })
            .await
    }

    /// Modify a record in place under the lease.
    ///
    /// If `f` fails nothing is written.
    pub async fn update_with<R, F>(&self, id: T::Id, f: F) -> Result<(T, R), StoreError>
    where
        F: FnOnce(&mut T) -> Result<R, StoreError> + Send,
        R: Send,
    {
        self.lease
            .mutate(T::COLLECTION, move |bytes| {
                let mut items: Vec<T> = decode(bytes)?;
                let slot = items
                    .iter_mut()
                    .find(|t| t.id() == id)
                    .ok_or_else(|| StoreError::not_found(T::KIND, id))?;
                let out = f(slot)?;
                let updated = slot.clone();
                Ok((Some(encode(&items)?), (updated, out)))
            })
            .await
    }

    /// Remove a record. Returns whether it was present.
    pub async fn delete(&self, id: T::Id) -> Result<bool, StoreError> {
        self.lease
            .mutate(T::COLLECTION, move |bytes| {
                let mut items: Vec<T> = decode(bytes)?;
                let before = items.len();
                items.retain(|t| t.id() != id);
                if items.len() == before {
                    return Ok((None, false));
                }
                Ok((Some(encode(&items)?), true))
            })
            .await
    }
}
