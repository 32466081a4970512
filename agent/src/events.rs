//! Lifecycle events and notification dispatch

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::errors::KeeperError;
use crate::models::restart::RestartTrigger;
use crate::storage::settings::SettingsProvider;

/// Something worth telling the outside world about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    JobStarted {
        job_id: String,
        total: usize,
    },
    JobProgress {
        job_id: String,
        container_name: String,
        checked: usize,
        total: usize,
        updates_found: usize,
        errors: usize,
    },
    JobCompleted {
        job_id: String,
        checked: usize,
        updates_found: usize,
        errors: usize,
    },
    JobCanceled {
        job_id: String,
        checked: usize,
        total: usize,
    },
    JobFailed {
        job_id: String,
        error: String,
    },
    UpdateFound {
        update_id: String,
        container_name: String,
        from_tag: String,
        to_tag: String,
        auto_approved: bool,
    },
    UpdateApplied {
        update_id: String,
        container_name: String,
        to_tag: String,
    },
    UpdateApplyFailed {
        update_id: String,
        container_name: String,
        error: String,
        retry_count: u32,
    },
    RestartAttempted {
        container_name: String,
        attempt: u32,
        trigger: RestartTrigger,
    },
    RestartSucceeded {
        container_name: String,
        attempt: u32,
    },
    RestartFailed {
        container_name: String,
        attempt: u32,
        error: String,
        next_retry_at: Option<DateTime<Utc>>,
    },
    MaxRetriesReached {
        container_name: String,
        attempts: u32,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::JobStarted { .. } => "job_started",
            LifecycleEvent::JobProgress { .. } => "job_progress",
            LifecycleEvent::JobCompleted { .. } => "job_completed",
            LifecycleEvent::JobCanceled { .. } => "job_canceled",
            LifecycleEvent::JobFailed { .. } => "job_failed",
            LifecycleEvent::UpdateFound { .. } => "update_found",
            LifecycleEvent::UpdateApplied { .. } => "update_applied",
            LifecycleEvent::UpdateApplyFailed { .. } => "update_apply_failed",
            LifecycleEvent::RestartAttempted { .. } => "restart_attempted",
            LifecycleEvent::RestartSucceeded { .. } => "restart_succeeded",
            LifecycleEvent::RestartFailed { .. } => "restart_failed",
            LifecycleEvent::MaxRetriesReached { .. } => "max_retries_reached",
        }
    }
}

/// Fire-and-forget event consumer
pub trait EventSink: Send + Sync {
    fn publish(&self, event: LifecycleEvent);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn publish(&self, _event: LifecycleEvent) {}
}

/// Fans events out to any number of subscribers
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: LifecycleEvent) {
        debug!(event = event.name(), "Publishing event");
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

/// Which events are forwarded to the notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationPolicy {
    pub update_found: bool,
    pub restart_failed: bool,
    pub max_retries: bool,
    pub job_failed: bool,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            update_found: false,
            restart_failed: false,
            max_retries: true,
            job_failed: true,
        }
    }
}

impl NotificationPolicy {
    pub fn from_settings(settings: &dyn SettingsProvider) -> Self {
        let defaults = Self::default();
        Self {
            update_found: settings.get_bool("notify.update_found", defaults.update_found),
            restart_failed: settings.get_bool("notify.restart_failed", defaults.restart_failed),
            max_retries: settings.get_bool("notify.max_retries", defaults.max_retries),
            job_failed: settings.get_bool("notify.job_failed", defaults.job_failed),
        }
    }

    pub fn should_notify(&self, event: &LifecycleEvent) -> bool {
        match event {
            LifecycleEvent::UpdateFound { .. } => self.update_found,
            LifecycleEvent::RestartFailed { .. } => self.restart_failed,
            LifecycleEvent::MaxRetriesReached { .. } => self.max_retries,
            LifecycleEvent::JobFailed { .. } | LifecycleEvent::UpdateApplyFailed { .. } => self.job_failed,
            _ => false,
        }
    }
}

/// Notification transport
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &LifecycleEvent) -> Result<(), KeeperError>;
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &LifecycleEvent) -> Result<(), KeeperError> {
        let payload = serde_json::to_string(event)?;
        warn!(event = event.name(), "Notification: {}", payload);
        Ok(())
    }
}

/// Publishes to an inner sink and forwards selected events to a notifier
pub struct NotifyingSink {
    inner: Arc<dyn EventSink>,
    policy: NotificationPolicy,
    notifier: Arc<dyn Notifier>,
}

impl NotifyingSink {
    pub fn new(inner: Arc<dyn EventSink>, policy: NotificationPolicy, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            inner,
            policy,
            notifier,
        }
    }
}

impl EventSink for NotifyingSink {
    fn publish(&self, event: LifecycleEvent) {
        if self.policy.should_notify(&event) {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let notifier = self.notifier.clone();
                    let notified = event.clone();
                    handle.spawn(async move {
                        if let Err(e) = notifier.notify(&notified).await {
                            error!(event = notified.name(), "Failed to send notification: {}", e);
                        }
                    });
                }
                Err(_) => info!(event = event.name(), "No runtime, notification dropped"),
            }
        }
        self.inner.publish(event);
    }
}
