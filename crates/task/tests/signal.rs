//! External-signal endpoint behavior.

mod common;

use std::time::Duration;

use common::{Harness, hours};
use pretty_assertions::assert_eq;
use rekey_core::{
    Clock, ConfirmationStrategies, ConfirmationStrategy, ManagedSecretId, ProviderOperation,
    TaskState,
};
use rekey_task::{SignalOutcome, TaskError};

#[tokio::test]
async fn far_from_expiry_needs_no_change() {
    let h = Harness::new();
    let secret = h
        .seed_secret(hours(1), ConfirmationStrategies::EXTERNAL_SIGNAL)
        .await;
    let before = h.datastore.secrets.list().await.unwrap();

    let outcome = h
        .executor
        .external_signal(secret.id, &secret.nonce)
        .await
        .unwrap();
    assert_eq!(outcome, SignalOutcome::NoChangeNeeded);
    assert_eq!(outcome.code(), 0);
    assert!(h.datastore.tasks.list().await.unwrap().is_empty());
    assert_eq!(h.datastore.secrets.list().await.unwrap(), before);
    assert!(h.journal.is_empty());
}

#[tokio::test]
async fn within_lead_time_rotates() {
    let h = Harness::new();
    let secret = h
        .seed_secret(hours(23), ConfirmationStrategies::EXTERNAL_SIGNAL)
        .await;

    let outcome = h
        .executor
        .external_signal(secret.id, &secret.nonce)
        .await
        .unwrap();
    assert_eq!(outcome, SignalOutcome::Rotated);

    let tasks = h.datastore.tasks.list().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].is_completed());
    assert_eq!(tasks[0].attempts().len(), 1);
    let stored = h.datastore.secrets.get(secret.id).await.unwrap();
    assert_eq!(stored.last_changed, Some(h.clock.now()));
}

#[tokio::test]
async fn expired_secret_rotates() {
    let h = Harness::new();
    let secret = h
        .seed_secret(hours(30), ConfirmationStrategies::EXTERNAL_SIGNAL)
        .await;
    let outcome = h
        .executor
        .external_signal(secret.id, &secret.nonce)
        .await
        .unwrap();
    assert_eq!(outcome, SignalOutcome::Rotated);
}

#[tokio::test]
async fn wrong_nonce_is_rejected() {
    let h = Harness::new();
    let secret = h
        .seed_secret(hours(23), ConfirmationStrategies::EXTERNAL_SIGNAL)
        .await;
    let err = h
        .executor
        .external_signal(secret.id, "not-the-nonce")
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::InvalidNonce { .. }));
    assert!(err.is_client_error());
    assert!(h.datastore.tasks.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_or_unconfigured_secret_is_a_client_error() {
    let h = Harness::new();
    let err = h
        .executor
        .external_signal(ManagedSecretId::v4(), "x")
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::ObjectNotFound { .. }));
    assert!(err.is_client_error());

    let secret = h
        .seed_secret(hours(23), ConfirmationStrategies::AUTOMATIC)
        .await;
    let err = h
        .executor
        .external_signal(secret.id, &secret.nonce)
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::NotConfiguredForExternalSignal { .. }));
    assert!(err.is_client_error());
}

#[tokio::test]
async fn failed_rotation_inside_the_bound_is_an_error() {
    let h = Harness::with_key_script(|p| p.failing_on(ProviderOperation::Rekey));
    let secret = h
        .seed_secret(hours(23), ConfirmationStrategies::EXTERNAL_SIGNAL)
        .await;
    let err = h
        .executor
        .external_signal(secret.id, &secret.nonce)
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::RotationFailed { .. }));
    assert_eq!(h.datastore.tasks.list().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_rotation_is_accepted_and_keeps_running() {
    let h = Harness::with_key_script(|p| {
        p.delayed(ProviderOperation::Rekey, Duration::from_secs(90))
    });
    let secret = h
        .seed_secret(hours(23), ConfirmationStrategies::EXTERNAL_SIGNAL)
        .await;

    let outcome = h
        .executor
        .external_signal(secret.id, &secret.nonce)
        .await
        .unwrap();
    assert_eq!(outcome, SignalOutcome::Accepted);
    assert_eq!(outcome.code(), 2);

    // A second signal while the first rotation runs creates nothing new.
    let again = h
        .executor
        .external_signal(secret.id, &secret.nonce)
        .await
        .unwrap();
    assert_eq!(again, SignalOutcome::Accepted);
    assert_eq!(h.datastore.tasks.list().await.unwrap().len(), 1);

    tokio::time::sleep(Duration::from_secs(120)).await;
    let tasks = h.datastore.tasks.list().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].is_completed());
    assert_eq!(tasks[0].attempts().len(), 1);
    let stored = h.datastore.secrets.get(secret.id).await.unwrap();
    assert_eq!(stored.last_changed, Some(h.clock.now()));
}

#[tokio::test]
async fn simultaneous_signals_rotate_once() {
    let h = Harness::new();
    let secret = h
        .seed_secret(hours(23), ConfirmationStrategies::EXTERNAL_SIGNAL)
        .await;

    let (a, b) = tokio::join!(
        h.executor.external_signal(secret.id, &secret.nonce),
        h.executor.external_signal(secret.id, &secret.nonce),
    );
    let mut codes = vec![a.unwrap().code(), b.unwrap().code()];
    codes.sort_unstable();
    assert_eq!(codes, vec![1, 2]);

    let tasks = h.datastore.tasks.list().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].is_completed());
    assert_eq!(h.journal.count(ProviderOperation::Rekey), 1);
}

#[tokio::test]
async fn task_awaiting_approval_holds_off_signals() {
    let h = Harness::new();
    let secret = h
        .seed_secret(
            hours(23),
            ConfirmationStrategies::EXTERNAL_SIGNAL | ConfirmationStrategies::ADMIN_CACHES_SIGN_OFF,
        )
        .await;
    let pending = h
        .executor
        .create_task(secret.id, ConfirmationStrategy::AdminCachesSignOff)
        .await
        .unwrap();

    let outcome = h
        .executor
        .external_signal(secret.id, &secret.nonce)
        .await
        .unwrap();
    assert_eq!(outcome, SignalOutcome::Accepted);

    let tasks = h.datastore.tasks.list().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, pending.id);
    assert_eq!(tasks[0].state(), TaskState::PendingApproval);
    assert!(h.journal.is_empty());
}

#[tokio::test]
async fn signal_after_a_failure_reruns_the_failed_task() {
    let h = Harness::with_key_script(|p| p.failing_on(ProviderOperation::Rekey));
    let secret = h
        .seed_secret(hours(23), ConfirmationStrategies::EXTERNAL_SIGNAL)
        .await;
    for _ in 0..2 {
        let err = h
            .executor
            .external_signal(secret.id, &secret.nonce)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::RotationFailed { .. }));
    }

    let tasks = h.datastore.tasks.list().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].state(), TaskState::Failed);
    assert_eq!(tasks[0].attempts().len(), 2);
    assert_eq!(h.journal.count(ProviderOperation::Rekey), 2);
}
