//! Lifecycle notifications.
//!
//! Dispatch is fire-and-forget: a dispatcher never fails the operation that
//! raised the event. Events carry ids and summaries, never secret material.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rekey_core::{ManagedSecretId, RekeyingTaskId};
use tokio::sync::broadcast;

/// Something worth telling an operator about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RekeyEvent {
    TaskCreated {
        task_id: RekeyingTaskId,
        secret_id: ManagedSecretId,
    },
    TaskApproved {
        task_id: RekeyingTaskId,
        approved_by: String,
    },
    TaskCompleted {
        task_id: RekeyingTaskId,
        secret_id: ManagedSecretId,
    },
    TaskFailed {
        task_id: RekeyingTaskId,
        summary: String,
    },
    TaskExpired {
        task_id: RekeyingTaskId,
    },
    SecretAboutToExpire {
        secret_id: ManagedSecretId,
        expiry: Option<DateTime<Utc>>,
    },
    SecretExpired {
        secret_id: ManagedSecretId,
    },
    SecretRotated {
        secret_id: ManagedSecretId,
        at: DateTime<Utc>,
    },
}

impl RekeyEvent {
    /// Short event name, e.g. `task_failed`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task_created",
            Self::TaskApproved { .. } => "task_approved",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskExpired { .. } => "task_expired",
            Self::SecretAboutToExpire { .. } => "secret_about_to_expire",
            Self::SecretExpired { .. } => "secret_expired",
            Self::SecretRotated { .. } => "secret_rotated",
        }
    }

    /// One-line human-readable description.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::TaskCreated { task_id, secret_id } => {
                format!("rekeying task {task_id} created for secret {secret_id}")
            }
            Self::TaskApproved {
                task_id,
                approved_by,
            } => format!("rekeying task {task_id} approved by {approved_by}"),
            Self::TaskCompleted { task_id, secret_id } => {
                format!("rekeying task {task_id} rotated secret {secret_id}")
            }
            Self::TaskFailed { task_id, summary } => {
                format!("rekeying task {task_id} failed: {summary}")
            }
            Self::TaskExpired { task_id } => {
                format!("rekeying task {task_id} expired before it ran")
            }
            Self::SecretAboutToExpire { secret_id, expiry } => match expiry {
                Some(at) => format!("secret {secret_id} expires at {at}"),
                None => format!("secret {secret_id} has never been rotated"),
            },
            Self::SecretExpired { secret_id } => format!("secret {secret_id} has expired"),
            Self::SecretRotated { secret_id, at } => {
                format!("secret {secret_id} rotated at {at}")
            }
        }
    }
}

impl fmt::Display for RekeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// Receives lifecycle events.
pub trait EventDispatcher: Send + Sync + fmt::Debug {
    fn dispatch(&self, event: RekeyEvent);
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDispatcher;

impl EventDispatcher for LoggingDispatcher {
    fn dispatch(&self, event: RekeyEvent) {
        match &event {
            RekeyEvent::TaskFailed { .. } | RekeyEvent::SecretExpired { .. } => {
                tracing::warn!(event = event.name(), "{}", event.description());
            }
            _ => tracing::info!(event = event.name(), "{}", event.description()),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingDispatcher {
    events: Arc<Mutex<Vec<RekeyEvent>>>,
}

impl RecordingDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<RekeyEvent> {
        self.events.lock().clone()
    }

    /// Names of recorded events, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(RekeyEvent::name).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventDispatcher for RecordingDispatcher {
    fn dispatch(&self, event: RekeyEvent) {
        self.events.lock().push(event);
    }
}

/// Fans events out to any number of subscribers.
///
/// With no subscribers, events are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastDispatcher {
    sender: broadcast::Sender<RekeyEvent>,
}

impl BroadcastDispatcher {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RekeyEvent> {
        self.sender.subscribe()
    }
}

impl EventDispatcher for BroadcastDispatcher {
    fn dispatch(&self, event: RekeyEvent) {
        let _ = self.sender.send(event);
    }
}

/// Sends each event to several dispatchers.
#[derive(Debug, Default, Clone)]
pub struct FanOutDispatcher {
    targets: Vec<Arc<dyn EventDispatcher>>,
}

impl FanOutDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, target: Arc<dyn EventDispatcher>) -> Self {
        self.targets.push(target);
        self
    }
}

impl EventDispatcher for FanOutDispatcher {
    fn dispatch(&self, event: RekeyEvent) {
        for target in &self.targets {
            target.dispatch(event.clone());
        }
    }
}
