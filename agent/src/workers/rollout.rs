//! Rollout worker: applies approved and due-retry updates

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::rollout::{ApplyOutcome, Rollout};
use crate::storage::settings::SettingsProvider;

/// Rollout worker options
#[derive(Debug, Clone)]
pub struct Options {
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

impl Options {
    pub fn from_settings(settings: &dyn SettingsProvider) -> Self {
        Self {
            interval: Duration::from_secs(
                settings
                    .get_int("rollout.interval_seconds", Self::default().interval.as_secs() as i64)
                    .max(1) as u64,
            ),
        }
    }
}

/// Run the rollout worker
pub async fn run<S, F>(
    options: &Options,
    rollout: &Rollout,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Rollout worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Rollout worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        match rollout.apply_batch(Utc::now()).await {
            Ok(summaries) if summaries.is_empty() => debug!("Nothing to roll out"),
            Ok(summaries) => {
                let applied = summaries
                    .iter()
                    .filter(|s| s.outcome == ApplyOutcome::Applied)
                    .count();
                let deferred = summaries
                    .iter()
                    .filter(|s| matches!(s.outcome, ApplyOutcome::Deferred { .. }))
                    .count();
                info!(
                    total = summaries.len(),
                    applied,
                    deferred,
                    failed = summaries.len() - applied - deferred,
                    "Rollout batch finished"
                );
            }
            Err(e) => error!("Rollout batch failed: {}", e),
        }
    }
}
