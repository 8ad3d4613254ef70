//! Shared fixtures for task tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use rekey_core::{
    AccessTokenCredential, Clock, ConfirmationStrategies, CredentialSourceError, EncryptionKey,
    IdentityService, ManagedSecret, ManualClock, Resource, SecureEntryId,
};
use rekey_provider::testing::{CallJournal, ScriptedProvider};
use rekey_provider::{ProviderContext, ProviderRegistry};
use rekey_storage::{
    Datastore, EncryptedSecureStorage, FixedJitter, LeasePolicy, MemoryBlobStore, SecureStorage,
    StoreError,
};
use rekey_task::{CredentialBroker, ExecutorSettings, RecordingDispatcher, TaskExecutor};
use rekey_workflow::{LocalRunner, RotationWorkflow, WorkflowOptions};

/// Identity service minting tokens relative to the test clock.
#[derive(Debug)]
pub struct FakeIdentity {
    clock: ManualClock,
    pub app_token: Mutex<String>,
    pub app_calls: AtomicUsize,
    pub obo_calls: AtomicUsize,
    pub user_session: Mutex<bool>,
}

impl FakeIdentity {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            app_token: Mutex::new("app-token".to_string()),
            app_calls: AtomicUsize::new(0),
            obo_calls: AtomicUsize::new(0),
            user_session: Mutex::new(true),
        }
    }

    pub fn app_calls(&self) -> usize {
        self.app_calls.load(Ordering::SeqCst)
    }

    pub fn obo_calls(&self) -> usize {
        self.obo_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityService for FakeIdentity {
    async fn access_token_for_application(
        &self,
        scopes: &[String],
    ) -> Result<AccessTokenCredential, CredentialSourceError> {
        self.app_calls.fetch_add(1, Ordering::SeqCst);
        Ok(AccessTokenCredential::new(
            self.app_token.lock().clone(),
            self.clock.now() + TimeDelta::hours(1),
            "rekey-app",
        )
        .with_scopes(scopes.to_vec()))
    }

    async fn access_token_on_behalf_of_current_user(
        &self,
        _resource: &str,
    ) -> Result<AccessTokenCredential, CredentialSourceError> {
        self.obo_calls.fetch_add(1, Ordering::SeqCst);
        if !*self.user_session.lock() {
            return Err(CredentialSourceError::NoUserSession);
        }
        Ok(AccessTokenCredential::new(
            "obo-token",
            self.clock.now() + TimeDelta::days(30),
            "admin@example.com",
        ))
    }
}

/// Secure storage whose `destroy` always fails.
#[derive(Clone)]
pub struct UndeletableStorage(pub Arc<dyn SecureStorage>);

#[async_trait]
impl SecureStorage for UndeletableStorage {
    async fn persist_bytes(
        &self,
        expiry: DateTime<Utc>,
        plaintext: &[u8],
    ) -> Result<SecureEntryId, StoreError> {
        self.0.persist_bytes(expiry, plaintext).await
    }

    async fn retrieve_bytes(&self, id: SecureEntryId) -> Result<Vec<u8>, StoreError> {
        self.0.retrieve_bytes(id).await
    }

    async fn destroy(&self, _id: SecureEntryId) -> Result<(), StoreError> {
        Err(StoreError::Backend("destroy refused".into()))
    }
}

type Script = Arc<dyn Fn(ScriptedProvider) -> ScriptedProvider + Send + Sync>;

pub struct Harness {
    pub clock: ManualClock,
    pub blobs: MemoryBlobStore,
    pub datastore: Datastore,
    pub journal: CallJournal,
    pub identity: Arc<FakeIdentity>,
    pub events: RecordingDispatcher,
    pub executor: TaskExecutor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_key_script(|p| p)
    }

    /// Harness whose rekeyable provider is adjusted by `script`.
    pub fn with_key_script(
        script: impl Fn(ScriptedProvider) -> ScriptedProvider + Send + Sync + 'static,
    ) -> Self {
        Self::build(script, |secure| secure)
    }

    /// Harness whose secure storage is wrapped by `layer`.
    pub fn with_secure_layer(
        layer: impl FnOnce(Arc<dyn SecureStorage>) -> Arc<dyn SecureStorage>,
    ) -> Self {
        Self::build(|p| p, layer)
    }

    fn build(
        script: impl Fn(ScriptedProvider) -> ScriptedProvider + Send + Sync + 'static,
        layer: impl FnOnce(Arc<dyn SecureStorage>) -> Arc<dyn SecureStorage>,
    ) -> Self {
        let clock = ManualClock::default();
        let blobs = MemoryBlobStore::new();
        let datastore = Datastore::new(
            Arc::new(blobs.clone()),
            LeasePolicy {
                backoff_min: Duration::from_millis(1),
                backoff_max: Duration::from_millis(5),
                ..LeasePolicy::default()
            },
            Arc::new(clock.clone()),
            Arc::new(FixedJitter(Duration::from_millis(2))),
        );

        let journal = CallJournal::new();
        let registry = ProviderRegistry::new();
        let script: Script = Arc::new(script);
        let key_journal = journal.clone();
        registry.register_fn("key", move |ctx: &ProviderContext| {
            let provider =
                ScriptedProvider::new(ctx.resource.id, key_journal.clone()).rekeyable("key");
            Ok(script(provider).into_instance())
        });
        let app_journal = journal.clone();
        registry.register_fn("app", move |ctx: &ProviderContext| {
            Ok(ScriptedProvider::new(ctx.resource.id, app_journal.clone())
                .consumer("app")
                .into_instance())
        });

        let identity = Arc::new(FakeIdentity::new(clock.clone()));
        let secure = layer(Arc::new(EncryptedSecureStorage::new(
            Arc::new(blobs.clone()),
            EncryptionKey::generate(),
            Arc::new(clock.clone()),
        )));
        let credentials = CredentialBroker::new(
            identity.clone(),
            secure,
            Arc::new(clock.clone()),
        );
        let runner = LocalRunner::new(
            Arc::new(registry),
            RotationWorkflow::new(WorkflowOptions::default(), Arc::new(clock.clone())),
        );
        let events = RecordingDispatcher::new();
        let executor = TaskExecutor::new(
            datastore.clone(),
            Arc::new(runner),
            credentials,
            Arc::new(events.clone()),
            Arc::new(clock.clone()),
        )
        .with_settings(ExecutorSettings {
            lead_time: Duration::from_secs(2 * 3600),
            default_task_lifetime: Duration::from_secs(7 * 24 * 3600),
            external_signal_timeout: Duration::from_secs(30),
        });

        Self {
            clock,
            blobs,
            datastore,
            journal,
            identity,
            events,
            executor,
        }
    }

    /// A 24h secret last rotated `age` ago, with one rekeyable and one consumer resource.
    pub async fn seed_secret(
        &self,
        age: Duration,
        confirmations: ConfirmationStrategies,
    ) -> ManagedSecret {
        let key = self
            .datastore
            .resources
            .create(Resource::new("storage-key", "key", "{}").rekeyable())
            .await
            .unwrap();
        let app = self
            .datastore
            .resources
            .create(Resource::new("web-app", "app", "{}"))
            .await
            .unwrap();
        let last_changed = self.clock.now() - rekey_core::to_delta(age);
        let secret = ManagedSecret::new("storage-account", Duration::from_secs(24 * 3600))
            .with_confirmations(confirmations)
            .with_resource(key.id)
            .with_resource(app.id)
            .with_last_changed(last_changed);
        self.datastore.secrets.create(secret).await.unwrap()
    }
}

pub fn hours(n: u64) -> Duration {
    Duration::from_secs(n * 3600)
}
