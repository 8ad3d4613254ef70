//! Service-to-agent round trips over both transports.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use pretty_assertions::assert_eq;
use rekey_agent::{
    AgentError, AgentExecutor, AgentKeys, AgentMessageEnvelope, AgentRunner, AgentTransport,
    ChannelTransport, InProcessTransport, MessageType, ProviderExecutionRequest,
};
use rekey_core::{
    AccessTokenCredential, AttemptStatus, Clock, ManagedSecret, ManualClock, ProviderOperation,
    Resource, WorkflowActionCollection,
};
use rekey_provider::testing::{CallJournal, ScriptedProvider};
use rekey_provider::{ProviderContext, ProviderRegistry};
use rekey_workflow::{
    LocalRunner, RotationWorkflow, RunRequest, WorkflowError, WorkflowOptions, WorkflowRunner,
};
use tokio::sync::watch;

struct Bridge {
    clock: ManualClock,
    keys: AgentKeys,
    journal: CallJournal,
    executor: Arc<AgentExecutor>,
}

impl Bridge {
    fn new() -> Self {
        Self::with_failure(None)
    }

    fn with_failure(failing: Option<ProviderOperation>) -> Self {
        let clock = ManualClock::default();
        let journal = CallJournal::new();
        let registry = ProviderRegistry::new();

        let key_journal = journal.clone();
        registry.register_fn("key", move |ctx: &ProviderContext| {
            let mut provider =
                ScriptedProvider::new(ctx.resource.id, key_journal.clone()).rekeyable("key");
            if let Some(operation) = failing {
                provider = provider.failing_on(operation);
            }
            Ok(provider.into_instance())
        });
        let app_journal = journal.clone();
        registry.register_fn("app", move |ctx: &ProviderContext| {
            Ok(ScriptedProvider::new(ctx.resource.id, app_journal.clone())
                .consumer("app")
                .into_instance())
        });

        let keys = AgentKeys::generate();
        let runner = LocalRunner::new(
            Arc::new(registry),
            RotationWorkflow::new(WorkflowOptions::default(), Arc::new(clock.clone())),
        );
        let executor = Arc::new(AgentExecutor::new(
            "agent-1",
            keys.clone(),
            runner,
            Arc::new(clock.clone()),
        ));
        Self {
            clock,
            keys,
            journal,
            executor,
        }
    }

    fn runner(&self, target: &str, transport: Arc<dyn AgentTransport>) -> AgentRunner {
        AgentRunner::new(
            "rekey-service",
            target,
            self.keys.clone(),
            transport,
            Arc::new(self.clock.clone()),
        )
    }

    fn in_process(&self) -> AgentRunner {
        self.runner(
            "agent-1",
            Arc::new(InProcessTransport::new(Arc::clone(&self.executor))),
        )
    }

    fn request(&self, key_type: &str) -> RunRequest {
        let key = Resource::new("storage-key", key_type, "{}").rekeyable();
        let app = Resource::new("web-app", "app", "{}");
        let secret = ManagedSecret::new("storage-account", Duration::from_secs(24 * 3600))
            .with_resource(key.id)
            .with_resource(app.id);
        RunRequest {
            secret,
            resources: vec![key, app],
            credential: AccessTokenCredential::new(
                "app-token",
                self.clock.now() + TimeDelta::hours(1),
                "rekey-app",
            ),
        }
    }
}

#[tokio::test]
async fn in_process_round_trip_runs_the_workflow_on_the_agent() {
    let bridge = Bridge::new();
    let request = bridge.request("key");
    let secret_id = request.secret.id;
    let (progress, watcher) = watch::channel(WorkflowActionCollection::new(
        secret_id,
        bridge.clock.now(),
    ));

    let attempt = bridge
        .in_process()
        .run(request, Some(progress))
        .await
        .unwrap();

    assert!(attempt.is_success());
    assert_eq!(attempt.status(), AttemptStatus::Succeeded);
    assert_eq!(attempt.managed_secret_id(), secret_id);
    assert_eq!(bridge.journal.count(ProviderOperation::Rekey), 1);
    assert_eq!(*watcher.borrow(), attempt);
}

#[tokio::test]
async fn channel_transport_serves_concurrent_requests() {
    let bridge = Bridge::new();
    let (transport, serving) = ChannelTransport::spawn(Arc::clone(&bridge.executor), 4);
    let runner = Arc::new(bridge.runner("agent-1", Arc::new(transport)));

    let mut runs = Vec::new();
    for _ in 0..3 {
        let runner = Arc::clone(&runner);
        let request = bridge.request("key");
        runs.push(tokio::spawn(async move { runner.run(request, None).await }));
    }
    for run in runs {
        assert!(run.await.unwrap().unwrap().is_success());
    }
    assert_eq!(bridge.journal.count(ProviderOperation::Rekey), 3);

    drop(runner);
    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn provider_failure_comes_back_in_the_attempt_log() {
    let bridge = Bridge::with_failure(Some(ProviderOperation::Rekey));

    let attempt = bridge
        .in_process()
        .run(bridge.request("key"), None)
        .await
        .unwrap();

    assert!(!attempt.is_success());
    assert!(attempt.failure().is_some());
    assert_eq!(bridge.journal.count(ProviderOperation::Cleanup), 0);
}

#[tokio::test]
async fn unknown_provider_type_is_rejected_by_the_agent() {
    let bridge = Bridge::new();

    let err = bridge
        .in_process()
        .run(bridge.request("no-such-type"), None)
        .await
        .unwrap_err();

    match err {
        WorkflowError::Runner { reason } => assert!(reason.contains("rejected"), "{reason}"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(bridge.journal.is_empty());
}

#[tokio::test]
async fn mismatched_keys_never_reach_the_providers() {
    let bridge = Bridge::new();
    let runner = AgentRunner::new(
        "rekey-service",
        "agent-1",
        AgentKeys::generate(),
        Arc::new(InProcessTransport::new(Arc::clone(&bridge.executor))),
        Arc::new(bridge.clock.clone()),
    );

    let err = runner.run(bridge.request("key"), None).await.unwrap_err();

    assert!(matches!(err, WorkflowError::Runner { .. }));
    assert!(err.to_string().contains("signature"), "{err}");
    assert!(bridge.journal.is_empty());
}

#[tokio::test]
async fn envelope_for_another_agent_is_refused() {
    let bridge = Bridge::new();
    let runner = bridge.runner(
        "agent-2",
        Arc::new(InProcessTransport::new(Arc::clone(&bridge.executor))),
    );

    let err = runner.run(bridge.request("key"), None).await.unwrap_err();

    assert!(err.to_string().contains("agent-2"), "{err}");
    assert!(bridge.journal.is_empty());
}

#[tokio::test]
async fn replayed_request_outside_the_window_is_stale() {
    let bridge = Bridge::new();
    let run = bridge.request("key");
    let envelope = AgentMessageEnvelope::seal(
        &bridge.keys,
        "rekey-service",
        "agent-1",
        MessageType::ProviderExecutionRequest,
        &ProviderExecutionRequest::new(run.secret, run.resources, run.credential),
        bridge.clock.now(),
    )
    .unwrap();

    bridge.executor.handle(envelope.clone()).await.unwrap();
    assert_eq!(bridge.journal.count(ProviderOperation::Rekey), 1);

    bridge.clock.advance(Duration::from_secs(301));
    let err = bridge.executor.handle(envelope).await.unwrap_err();

    assert!(matches!(err, AgentError::Stale { .. }));
    assert_eq!(bridge.journal.count(ProviderOperation::Rekey), 1);
}

#[tokio::test]
async fn duplicate_request_inside_the_window_runs_once() {
    let bridge = Bridge::new();
    let run = bridge.request("key");
    let envelope = AgentMessageEnvelope::seal(
        &bridge.keys,
        "rekey-service",
        "agent-1",
        MessageType::ProviderExecutionRequest,
        &ProviderExecutionRequest::new(run.secret, run.resources, run.credential),
        bridge.clock.now(),
    )
    .unwrap();

    bridge.executor.handle(envelope.clone()).await.unwrap();
    bridge.clock.advance(Duration::from_secs(30));
    let err = bridge.executor.handle(envelope).await.unwrap_err();

    assert!(matches!(err, AgentError::Replayed { .. }));
    assert!(err.is_rejection());
    assert_eq!(bridge.journal.count(ProviderOperation::Rekey), 1);
}

#[tokio::test]
async fn distinct_requests_both_run() {
    let bridge = Bridge::new();
    for _ in 0..2 {
        let run = bridge.request("key");
        let envelope = AgentMessageEnvelope::seal(
            &bridge.keys,
            "rekey-service",
            "agent-1",
            MessageType::ProviderExecutionRequest,
            &ProviderExecutionRequest::new(run.secret, run.resources, run.credential),
            bridge.clock.now(),
        )
        .unwrap();
        bridge.executor.handle(envelope).await.unwrap();
    }
    assert_eq!(bridge.journal.count(ProviderOperation::Rekey), 2);
}

#[tokio::test]
async fn tampered_request_is_rejected_before_execution() {
    let bridge = Bridge::new();
    let run = bridge.request("key");
    let mut envelope = AgentMessageEnvelope::seal(
        &bridge.keys,
        "rekey-service",
        "agent-1",
        MessageType::ProviderExecutionRequest,
        &ProviderExecutionRequest::new(run.secret, run.resources, run.credential),
        bridge.clock.now(),
    )
    .unwrap();
    envelope.originator = "somebody-else".into();

    let err = bridge.executor.handle(envelope).await.unwrap_err();

    assert!(matches!(err, AgentError::SignatureMismatch));
    assert!(err.is_rejection());
    assert!(bridge.journal.is_empty());
}
