//! Restart supervision worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::deploy::{ContainerStatus, LivenessProbe};
use crate::errors::KeeperError;
use crate::models::restart::RestartTrigger;
use crate::restart::controller::{AttemptOutcome, RestartController};
use crate::storage::settings::SettingsProvider;
use crate::storage::traits::Store;

/// Restarter worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between supervision passes
    pub interval: Duration,

    /// Liveness probes running at once
    pub probe_concurrency: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            probe_concurrency: 4,
        }
    }
}

impl Options {
    pub fn from_settings(settings: &dyn SettingsProvider) -> Self {
        let defaults = Self::default();
        Self {
            interval: Duration::from_secs(
                settings
                    .get_int("restart.poll_interval_seconds", defaults.interval.as_secs() as i64)
                    .max(1) as u64,
            ),
            probe_concurrency: settings
                .get_int("restart.probe_concurrency", defaults.probe_concurrency as i64)
                .max(1) as usize,
        }
    }
}

/// What one supervision pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub exits_recorded: usize,
    pub forgiven: usize,
    pub attempted: usize,
    pub blocked: usize,
}

/// Run the restarter worker
pub async fn run<S, F>(
    options: &Options,
    controller: &RestartController,
    store: &dyn Store,
    liveness: Option<&dyn LivenessProbe>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Restarter worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Restarter worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        match pass(options, controller, store, liveness, Utc::now()).await {
            Ok(report) if report == PassReport::default() => debug!("Nothing to supervise"),
            Ok(report) => info!(?report, "Supervision pass finished"),
            Err(e) => error!("Supervision pass failed: {}", e),
        }
    }
}

/// One supervision pass: detect exits, forgive stable containers, retry due ones
pub async fn pass(
    options: &Options,
    controller: &RestartController,
    store: &dyn Store,
    liveness: Option<&dyn LivenessProbe>,
    now: DateTime<Utc>,
) -> Result<PassReport, KeeperError> {
    let mut report = PassReport::default();

    if let Some(probe) = liveness {
        let names: Vec<String> = store
            .list_containers()
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();

        let exited: Vec<String> = stream::iter(names)
            .map(|name| async move {
                match probe.status(&name).await {
                    Ok(ContainerStatus::Exited) => Some(name),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(container = %name, "Liveness probe failed: {}", e);
                        None
                    }
                }
            })
            .buffer_unordered(options.probe_concurrency.max(1))
            .filter_map(|name| async move { name })
            .collect()
            .await;

        for name in exited {
            let before = controller.state(&name).await?.map(|s| s.consecutive_failures);
            let after = controller.record_exit(&name, now).await?;
            if before != Some(after.consecutive_failures) {
                report.exits_recorded += 1;
            }
        }
    }

    report.forgiven = controller.sweep_success_windows(now).await?.len();

    for name in controller.due_for_retry(now).await? {
        match controller.attempt(&name, RestartTrigger::Automatic).await {
            Ok(AttemptOutcome::Blocked(reason)) => {
                debug!(container = %name, "Retry blocked: {}", reason);
                report.blocked += 1;
            }
            Ok(_) => report.attempted += 1,
            Err(e) => error!(container = %name, "Restart attempt failed: {}", e),
        }
    }

    Ok(report)
}
