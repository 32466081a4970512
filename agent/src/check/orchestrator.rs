//! Check job orchestration

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::check::grouping::{group_containers, CheckGroup};
use crate::check::record::{record_decision, Recorded};
use crate::decision::{decide_group, UpdateDecision};
use crate::errors::KeeperError;
use crate::events::{EventSink, LifecycleEvent};
use crate::models::check_job::{CheckJob, CheckOutcome, ContainerCheckResult, JobStatus};
use crate::models::container::{Container, UpdatePolicy};
use crate::resolver::TagResolver;
use crate::storage::settings::SettingsProvider;
use crate::storage::traits::Store;
use crate::storage::StorageError;

/// Check job options
#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Groups processed at the same time
    pub concurrency_limit: usize,

    /// Share one fetch and decision between identical containers
    pub dedup_enabled: bool,

    /// Job-wide prerelease default, overridable per container
    pub include_prereleases: bool,

    /// How often the cancel flag is polled
    pub cancel_poll_interval: Duration,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            dedup_enabled: true,
            include_prereleases: false,
            cancel_poll_interval: Duration::from_millis(1000),
        }
    }
}

impl CheckOptions {
    pub fn from_settings(settings: &dyn SettingsProvider) -> Self {
        let defaults = Self::default();
        Self {
            concurrency_limit: settings
                .get_int("check.concurrency_limit", defaults.concurrency_limit as i64)
                .max(1) as usize,
            dedup_enabled: settings.get_bool("check.dedup_enabled", defaults.dedup_enabled),
            include_prereleases: settings.get_bool("check.include_prereleases", defaults.include_prereleases),
            cancel_poll_interval: Duration::from_millis(
                settings
                    .get_int(
                        "check.cancel_poll_interval_ms",
                        defaults.cancel_poll_interval.as_millis() as i64,
                    )
                    .max(1) as u64,
            ),
        }
    }
}

/// Runs "check all containers" jobs.
///
/// Containers are grouped by image key; groups run on a bounded pool and
/// every result flows through one aggregator task that owns the job
/// counters.
#[derive(Clone)]
pub struct CheckOrchestrator {
    store: Arc<dyn Store>,
    resolver: Arc<TagResolver>,
    events: Arc<dyn EventSink>,
    options: CheckOptions,
}

impl CheckOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        resolver: Arc<TagResolver>,
        events: Arc<dyn EventSink>,
        options: CheckOptions,
    ) -> Self {
        Self {
            store,
            resolver,
            events,
            options,
        }
    }

    pub fn options(&self) -> &CheckOptions {
        &self.options
    }

    /// Queue a new job; fails while another job is queued or running
    pub async fn trigger(&self) -> Result<CheckJob, KeeperError> {
        match self.store.create_job_if_idle(CheckJob::new(Utc::now())).await {
            Ok(job) => {
                info!(job_id = %job.id, "Check job queued");
                Ok(job)
            }
            Err(StorageError::JobAlreadyActive(id)) => Err(KeeperError::JobAlreadyActive(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Queue a job and run it to completion
    pub async fn trigger_and_run(&self) -> Result<CheckJob, KeeperError> {
        let job = self.trigger().await?;
        self.run(&job.id).await
    }

    /// Ask a running job to stop; false when the job is already finished
    pub async fn cancel(&self, job_id: &str) -> Result<bool, KeeperError> {
        let requested = self.store.request_cancel(job_id).await?;
        if requested {
            info!(job_id, "Check job cancellation requested");
        }
        Ok(requested)
    }

    /// Run a queued job.
    ///
    /// The body runs in its own task; a panic or an escaped error marks the
    /// job failed and the failed job is returned.
    pub async fn run(&self, job_id: &str) -> Result<CheckJob, KeeperError> {
        let this = self.clone();
        let id = job_id.to_string();
        let outcome = tokio::spawn(async move { this.run_job(&id).await }).await;

        let failure = match outcome {
            Ok(Ok(job)) => return Ok(job),
            Ok(Err(e @ (KeeperError::NotFound(_) | KeeperError::ValidationError(_)))) => return Err(e),
            Ok(Err(e)) => e.to_string(),
            Err(join_error) => format!("Check job task aborted: {}", join_error),
        };

        error!(job_id, "Check job failed: {}", failure);
        self.mark_failed(job_id, &failure).await
    }

    async fn mark_failed(&self, job_id: &str, failure: &str) -> Result<CheckJob, KeeperError> {
        let mut job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| KeeperError::NotFound(format!("check job {}", job_id)))?;

        if job.status.is_active() {
            job.error = Some(failure.to_string());
            job.finish(JobStatus::Failed, Utc::now());
            self.store.save_job(job.clone()).await?;
            self.events.publish(LifecycleEvent::JobFailed {
                job_id: job.id.clone(),
                error: failure.to_string(),
            });
        }
        Ok(job)
    }

    async fn run_job(&self, job_id: &str) -> Result<CheckJob, KeeperError> {
        let mut job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| KeeperError::NotFound(format!("check job {}", job_id)))?;
        if job.status != JobStatus::Queued {
            return Err(KeeperError::ValidationError(format!(
                "Check job {} is {:?}, not queued",
                job_id, job.status
            )));
        }

        let containers: Vec<Container> = self
            .store
            .list_containers()
            .await?
            .into_iter()
            .filter(|c| c.policy != UpdatePolicy::Disabled)
            .collect();
        let groups = group_containers(containers, self.options.include_prereleases, self.options.dedup_enabled);

        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.total_count = groups.iter().map(|g| g.containers.len()).sum();
        self.store.save_job(job.clone()).await?;
        info!(
            job_id,
            containers = job.total_count,
            groups = groups.len(),
            "Check job started"
        );
        self.events.publish(LifecycleEvent::JobStarted {
            job_id: job.id.clone(),
            total: job.total_count,
        });

        let canceled = Arc::new(AtomicBool::new(self.store.is_cancel_requested(job_id).await?));
        let monitor = self.spawn_cancel_monitor(job_id.to_string(), canceled.clone());

        let (tx, rx) = mpsc::channel(64);
        let aggregator = tokio::spawn(aggregate(
            self.store.clone(),
            self.events.clone(),
            job,
            rx,
        ));

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency_limit.max(1)));
        let mut workers = JoinSet::new();
        for group in groups {
            let worker = GroupWorker {
                store: self.store.clone(),
                resolver: self.resolver.clone(),
                events: self.events.clone(),
                canceled: canceled.clone(),
                tx: tx.clone(),
            };
            let semaphore = semaphore.clone();
            workers.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                worker.process(group).await;
            });
        }
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(job_id, "Check worker panicked: {}", e);
            }
        }
        monitor.abort();

        let mut job = aggregator
            .await
            .map_err(|e| KeeperError::Internal(format!("Aggregator failed: {}", e)))??;

        let was_canceled = canceled.load(Ordering::SeqCst) || self.store.is_cancel_requested(job_id).await?;
        let now = Utc::now();
        if was_canceled {
            job.finish(JobStatus::Canceled, now);
            self.store.save_job(job.clone()).await?;
            info!(job_id, checked = job.checked_count, total = job.total_count, "Check job canceled");
            self.events.publish(LifecycleEvent::JobCanceled {
                job_id: job.id.clone(),
                checked: job.checked_count,
                total: job.total_count,
            });
        } else {
            job.finish(JobStatus::Done, now);
            self.store.save_job(job.clone()).await?;
            info!(
                job_id,
                checked = job.checked_count,
                updates = job.updates_found,
                errors = job.errors_count,
                "Check job done"
            );
            self.events.publish(LifecycleEvent::JobCompleted {
                job_id: job.id.clone(),
                checked: job.checked_count,
                updates_found: job.updates_found,
                errors: job.errors_count,
            });
        }

        Ok(job)
    }

    fn spawn_cancel_monitor(&self, job_id: String, canceled: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let interval = self.options.cancel_poll_interval;
        tokio::spawn(async move {
            while !canceled.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                match store.is_cancel_requested(&job_id).await {
                    Ok(true) => {
                        info!(job_id = %job_id, "Cancel observed, remaining groups will be skipped");
                        canceled.store(true, Ordering::SeqCst);
                    }
                    Ok(false) => {}
                    Err(e) => warn!(job_id = %job_id, "Failed to poll cancel flag: {}", e),
                }
            }
        })
    }
}

/// Single writer for the job row
async fn aggregate(
    store: Arc<dyn Store>,
    events: Arc<dyn EventSink>,
    mut job: CheckJob,
    mut rx: mpsc::Receiver<ContainerCheckResult>,
) -> Result<CheckJob, KeeperError> {
    while let Some(result) = rx.recv().await {
        let container_name = result.container_name.clone();
        job.record(result);
        store.save_job(job.clone()).await?;
        events.publish(LifecycleEvent::JobProgress {
            job_id: job.id.clone(),
            container_name,
            checked: job.checked_count,
            total: job.total_count,
            updates_found: job.updates_found,
            errors: job.errors_count,
        });
    }
    Ok(job)
}

struct GroupWorker {
    store: Arc<dyn Store>,
    resolver: Arc<TagResolver>,
    events: Arc<dyn EventSink>,
    canceled: Arc<AtomicBool>,
    tx: mpsc::Sender<ContainerCheckResult>,
}

impl GroupWorker {
    async fn process(self, group: CheckGroup) {
        if self.canceled.load(Ordering::SeqCst) {
            debug!(key = %group.key, "Skipping group, job canceled");
            return;
        }

        let key = &group.key;
        let tags = match self.resolver.fetch_tags(&key.registry, &key.image).await {
            Ok(tags) => tags,
            Err(e) => {
                warn!(key = %key, "Tag fetch failed: {}", e);
                let message = e.to_string();
                for container in &group.containers {
                    self.send(container, CheckOutcome::Error { message: message.clone() }, false)
                        .await;
                }
                return;
            }
        };

        let decisions = decide_group(&key.current_tag, &tags, key.include_prereleases);
        for container in &group.containers {
            let (outcome, recorded) = match decisions.for_scope(container.scope) {
                UpdateDecision::NoUpdate => (CheckOutcome::UpToDate, false),
                UpdateDecision::Update { target_tag } => self.record(container, target_tag).await,
            };
            self.send(container, outcome, recorded).await;
        }
    }

    async fn record(&self, container: &Container, target_tag: &str) -> (CheckOutcome, bool) {
        match record_decision(self.store.as_ref(), container, target_tag, Utc::now()).await {
            Ok(recorded) => {
                if let Some(update) = recorded.update() {
                    self.events.publish(LifecycleEvent::UpdateFound {
                        update_id: update.id.clone(),
                        container_name: container.name.clone(),
                        from_tag: update.from_tag.clone(),
                        to_tag: update.to_tag.clone(),
                        auto_approved: container.policy == UpdatePolicy::Auto,
                    });
                }
                let written = !matches!(recorded, Recorded::Unchanged);
                (
                    CheckOutcome::UpdateAvailable {
                        target_tag: target_tag.to_string(),
                    },
                    written,
                )
            }
            Err(e) => {
                error!(container = %container.name, "Failed to record update: {}", e);
                (CheckOutcome::Error { message: e.to_string() }, false)
            }
        }
    }

    async fn send(&self, container: &Container, outcome: CheckOutcome, update_recorded: bool) {
        let result = ContainerCheckResult {
            container_name: container.name.clone(),
            outcome,
            update_recorded,
            checked_at: Utc::now(),
        };
        if self.tx.send(result).await.is_err() {
            error!(container = %container.name, "Aggregator gone, result dropped");
        }
    }
}
