//! Periodic update check worker

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::check::CheckOrchestrator;
use crate::errors::KeeperError;
use crate::storage::settings::SettingsProvider;

/// Checker worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between check jobs
    pub interval: Duration,

    /// Initial delay before the first job
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            initial_delay: Duration::from_secs(10),
        }
    }
}

impl Options {
    pub fn from_settings(settings: &dyn SettingsProvider) -> Self {
        let defaults = Self::default();
        Self {
            interval: Duration::from_secs(
                settings
                    .get_int("check.interval_seconds", defaults.interval.as_secs() as i64)
                    .max(1) as u64,
            ),
            ..defaults
        }
    }
}

/// Run the checker worker
pub async fn run<S, F>(
    options: &Options,
    orchestrator: &CheckOrchestrator,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Checker worker starting...");

    let mut wait = options.initial_delay;
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Checker worker shutting down...");
                return;
            }
            _ = sleep_fn(wait) => {}
        }
        wait = options.interval;

        match orchestrator.trigger_and_run().await {
            Ok(job) => info!(
                job_id = %job.id,
                status = ?job.status,
                checked = job.checked_count,
                updates = job.updates_found,
                errors = job.errors_count,
                "Scheduled check finished"
            ),
            Err(KeeperError::JobAlreadyActive(id)) => {
                debug!(job_id = %id, "Check job already active, skipping this round");
            }
            Err(e) => error!("Scheduled check failed: {}", e),
        }
    }
}
