//! Update lifecycle: approval, snoozing and dependency-ordered apply

pub mod window;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::deploy::{Executor, Intent};
use crate::errors::KeeperError;
use crate::events::{EventSink, LifecycleEvent};
use crate::models::container::{is_valid_name, Container};
use crate::models::restart::ExecutionSummary;
use crate::models::update::{Update, UpdateStatus};
use crate::rollout::window::window_allows;
use crate::scheduler::DependencyScheduler;
use crate::storage::settings::SettingsProvider;
use crate::storage::traits::Store;
use crate::storage::StorageError;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Rollout options
#[derive(Debug, Clone)]
pub struct RolloutOptions {
    /// Failed applies retried automatically before waiting for re-approval
    pub max_apply_retries: u32,

    pub retry_backoff: CooldownOptions,
}

impl Default for RolloutOptions {
    fn default() -> Self {
        Self {
            max_apply_retries: 3,
            retry_backoff: CooldownOptions {
                base_delay: Duration::from_secs(60),
                max_delay: Duration::from_secs(3600),
                multiplier: 2.0,
            },
        }
    }
}

impl RolloutOptions {
    pub fn from_settings(settings: &dyn SettingsProvider) -> Self {
        let defaults = Self::default();
        Self {
            max_apply_retries: settings
                .get_int("rollout.max_apply_retries", defaults.max_apply_retries as i64)
                .max(0) as u32,
            retry_backoff: CooldownOptions {
                base_delay: Duration::from_secs_f64(
                    settings
                        .get_float(
                            "rollout.retry_base_seconds",
                            defaults.retry_backoff.base_delay.as_secs_f64(),
                        )
                        .max(0.0),
                ),
                max_delay: Duration::from_secs_f64(
                    settings
                        .get_float(
                            "rollout.retry_max_seconds",
                            defaults.retry_backoff.max_delay.as_secs_f64(),
                        )
                        .max(0.0),
                ),
                multiplier: defaults.retry_backoff.multiplier,
            },
        }
    }
}

/// What happened to one update in a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied,

    /// Left for a later batch
    Deferred { reason: String },

    Failed {
        error: String,
        next_retry_at: Option<DateTime<Utc>>,
    },

    /// Someone else changed the update while it was being applied
    Conflict,
}

/// Per-update result of [`Rollout::apply_batch`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplySummary {
    pub update_id: String,
    pub container_name: String,
    pub to_tag: String,
    #[serde(flatten)]
    pub outcome: ApplyOutcome,
}

/// Per-item result of [`Rollout::approve_many`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalSummary {
    pub update_id: String,
    pub approved: bool,
    pub error: Option<String>,
}

/// Drives updates from approval to applied.
pub struct Rollout {
    store: Arc<dyn Store>,
    scheduler: Arc<DependencyScheduler>,
    executor: Arc<dyn Executor>,
    events: Arc<dyn EventSink>,
    options: RolloutOptions,
}

impl Rollout {
    pub fn new(
        store: Arc<dyn Store>,
        scheduler: Arc<DependencyScheduler>,
        executor: Arc<dyn Executor>,
        events: Arc<dyn EventSink>,
        options: RolloutOptions,
    ) -> Self {
        Self {
            store,
            scheduler,
            executor,
            events,
            options,
        }
    }

    /// Approve a pending update, or re-approve one waiting in pending_retry.
    ///
    /// Re-approval starts a fresh retry budget.
    pub async fn approve(&self, id: &str, expected_version: u64) -> Result<Update, KeeperError> {
        self.change_status(id, expected_version, UpdateStatus::Approved).await
    }

    pub async fn reject(&self, id: &str, expected_version: u64) -> Result<Update, KeeperError> {
        self.change_status(id, expected_version, UpdateStatus::Rejected).await
    }

    /// Hide a pending update until `until`
    pub async fn snooze(
        &self,
        id: &str,
        expected_version: u64,
        until: DateTime<Utc>,
    ) -> Result<Update, KeeperError> {
        let mut update = self.load_expected(id, expected_version).await?;
        if update.status != UpdateStatus::Pending {
            return Err(KeeperError::ValidationError(format!(
                "Only pending updates can be snoozed, {} is {}",
                id, update.status
            )));
        }

        update.snoozed_until = Some(until);
        update.updated_at = Utc::now();
        let saved = self.store.save_update(update, expected_version).await?;
        info!(update_id = %saved.id, container = %saved.container_name, "Update snoozed until {}", until);
        Ok(saved)
    }

    /// Approve several updates; one failure does not stop the rest
    pub async fn approve_many(&self, items: &[(String, u64)]) -> Vec<ApprovalSummary> {
        let mut summaries = Vec::with_capacity(items.len());
        for (id, expected_version) in items {
            let summary = match self.approve(id, *expected_version).await {
                Ok(_) => ApprovalSummary {
                    update_id: id.clone(),
                    approved: true,
                    error: None,
                },
                Err(e) => {
                    warn!(update_id = %id, "Approval failed: {}", e);
                    ApprovalSummary {
                        update_id: id.clone(),
                        approved: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            summaries.push(summary);
        }
        summaries
    }

    /// Updates waiting for an operator, oldest first
    pub async fn pending_updates(&self) -> Result<Vec<Update>, KeeperError> {
        let mut pending = self.store.list_updates_by_status(UpdateStatus::Pending).await?;
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pending)
    }

    /// Replace a container's dependency list
    pub async fn set_dependencies(&self, name: &str, dependencies: Vec<String>) -> Result<Container, KeeperError> {
        let mut container = self
            .store
            .get_container(name)
            .await?
            .ok_or_else(|| KeeperError::NotFound(format!("container {}", name)))?;

        let mut seen = HashSet::new();
        let mut cleaned = Vec::with_capacity(dependencies.len());
        for dep in dependencies {
            let dep = dep.trim().to_string();
            if !is_valid_name(&dep) {
                return Err(KeeperError::ValidationError(format!("Invalid dependency name {:?}", dep)));
            }
            if dep == name {
                return Err(KeeperError::ValidationError(format!("{} cannot depend on itself", name)));
            }
            if seen.insert(dep.clone()) {
                cleaned.push(dep);
            }
        }

        container.dependencies = cleaned;
        self.store.upsert_container(container.clone()).await?;
        self.scheduler.invalidate();
        info!(container = %name, dependencies = ?container.dependencies, "Dependencies updated");
        Ok(container)
    }

    /// Apply every approved update and every pending_retry update that is due.
    ///
    /// Dependencies inside the batch are applied first. A container whose
    /// dependency was tried and did not apply in this batch is deferred, as
    /// is one outside its update window.
    pub async fn apply_batch(&self, now: DateTime<Utc>) -> Result<Vec<ApplySummary>, KeeperError> {
        let mut candidates = self.store.list_updates_by_status(UpdateStatus::Approved).await?;
        candidates.extend(
            self.store
                .list_updates_by_status(UpdateStatus::PendingRetry)
                .await?
                .into_iter()
                .filter(|u| u.is_due_for_retry(now)),
        );
        if candidates.is_empty() {
            debug!("No updates to apply");
            return Ok(Vec::new());
        }

        // Newest update wins per container
        candidates.sort_by(|a, b| {
            a.container_name
                .cmp(&b.container_name)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        candidates.dedup_by(|later, kept| later.container_name == kept.container_name);

        let mut summaries = Vec::with_capacity(candidates.len());
        let mut batch: HashMap<String, (Update, Container)> = HashMap::new();
        for update in candidates {
            match self.store.get_container(&update.container_name).await? {
                Some(container) => {
                    batch.insert(update.container_name.clone(), (update, container));
                }
                None => {
                    warn!(container = %update.container_name, update_id = %update.id, "Update for unknown container");
                    summaries.push(summary(
                        &update,
                        ApplyOutcome::Deferred {
                            reason: "container not in inventory".to_string(),
                        },
                    ));
                }
            }
        }

        let mut input_order: Vec<String> = batch.keys().cloned().collect();
        input_order.sort();
        let dependencies: HashMap<String, Vec<String>> = batch
            .iter()
            .map(|(name, (_, container))| (name.clone(), container.dependencies.clone()))
            .collect();
        let order = self.scheduler.order_or_input(&dependencies, &input_order);
        info!(count = order.len(), "Applying updates in order {:?}", order);

        let mut processed: HashSet<String> = HashSet::new();
        let mut applied: HashSet<String> = HashSet::new();
        for name in order {
            let Some((update, container)) = batch.remove(&name) else {
                continue;
            };

            // After a cycle fallback a dependency may come later; only earlier ones gate
            let blocked_by = container
                .dependencies
                .iter()
                .find(|dep| processed.contains(*dep) && !applied.contains(*dep))
                .cloned();
            let outcome = if let Some(dep) = blocked_by {
                info!(container = %name, dependency = %dep, "Deferring update, dependency not applied");
                ApplyOutcome::Deferred {
                    reason: format!("dependency {} not applied", dep),
                }
            } else if !window_allows(container.update_window.as_deref(), now) {
                info!(container = %name, "Deferring update, outside update window");
                ApplyOutcome::Deferred {
                    reason: "outside update window".to_string(),
                }
            } else {
                match self.apply_one(update.clone(), container, now).await {
                    Ok(outcome) => outcome,
                    Err(KeeperError::StorageError(StorageError::VersionConflict { .. })) => {
                        warn!(container = %name, update_id = %update.id, "Update changed while applying");
                        ApplyOutcome::Conflict
                    }
                    Err(e) => {
                        error!(container = %name, update_id = %update.id, "Failed to apply update: {}", e);
                        ApplyOutcome::Failed {
                            error: e.to_string(),
                            next_retry_at: None,
                        }
                    }
                }
            };

            if outcome == ApplyOutcome::Applied {
                applied.insert(name.clone());
            }
            processed.insert(name);
            summaries.push(summary(&update, outcome));
        }

        Ok(summaries)
    }

    async fn apply_one(
        &self,
        mut update: Update,
        mut container: Container,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, KeeperError> {
        let expected_version = update.version;
        let intent = Intent::SetTag {
            container: container.name.clone(),
            image: container.image.clone(),
            tag: update.to_tag.clone(),
        };
        info!(container = %container.name, "Applying {} -> {}", update.from_tag, update.to_tag);
        let result = self.executor.execute(intent).await;

        if result.success {
            update.transition(UpdateStatus::Applied, now)?;
            update.next_retry_at = None;
            update.last_error = None;
            let saved = self.store.save_update(update, expected_version).await?;

            container.current_tag = saved.to_tag.clone();
            self.store.upsert_container(container).await?;
            self.retire_older(&saved, now).await?;

            info!(container = %saved.container_name, update_id = %saved.id, "Update applied");
            self.events.publish(LifecycleEvent::UpdateApplied {
                update_id: saved.id.clone(),
                container_name: saved.container_name.clone(),
                to_tag: saved.to_tag.clone(),
            });
            return Ok(ApplyOutcome::Applied);
        }

        let summary = ExecutionSummary::new(false, &result.output, result.duration.as_millis() as u64);
        update.transition(UpdateStatus::PendingRetry, now)?;
        update.retry_count = update.retry_count.saturating_add(1);
        update.last_error = Some(summary.output);
        update.next_retry_at = if update.retry_count < self.options.max_apply_retries {
            let delay = calc_exp_backoff(&self.options.retry_backoff, update.retry_count - 1);
            Some(now + chrono::Duration::milliseconds(delay.as_millis() as i64))
        } else {
            warn!(
                container = %update.container_name,
                retries = update.retry_count,
                "Apply retries exhausted, waiting for re-approval"
            );
            None
        };
        let saved = self.store.save_update(update, expected_version).await?;

        let error = saved.last_error.clone().unwrap_or_default();
        error!(container = %saved.container_name, update_id = %saved.id, "Apply failed: {}", error);
        self.events.publish(LifecycleEvent::UpdateApplyFailed {
            update_id: saved.id.clone(),
            container_name: saved.container_name.clone(),
            error: error.clone(),
            retry_count: saved.retry_count,
        });
        Ok(ApplyOutcome::Failed {
            error,
            next_retry_at: saved.next_retry_at,
        })
    }

    /// Reject open updates for a container that an applied one superseded
    async fn retire_older(&self, applied: &Update, now: DateTime<Utc>) -> Result<(), KeeperError> {
        for mut other in self.store.list_updates_for_container(&applied.container_name).await? {
            if other.id == applied.id || !matches!(other.status, UpdateStatus::Approved | UpdateStatus::PendingRetry) {
                continue;
            }
            let expected = other.version;
            other.transition(UpdateStatus::Rejected, now)?;
            other.last_error = Some(format!("superseded by {}", applied.to_tag));
            match self.store.save_update(other, expected).await {
                Ok(retired) => debug!(update_id = %retired.id, "Retired superseded update"),
                Err(StorageError::VersionConflict { id, .. }) => {
                    warn!(update_id = %id, "Superseded update changed concurrently, left as is")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn load_expected(&self, id: &str, expected_version: u64) -> Result<Update, KeeperError> {
        let update = self
            .store
            .get_update(id)
            .await?
            .ok_or_else(|| KeeperError::NotFound(format!("update {}", id)))?;
        if update.version != expected_version {
            return Err(StorageError::VersionConflict {
                id: id.to_string(),
                expected: expected_version,
                found: update.version,
            }
            .into());
        }
        Ok(update)
    }

    async fn change_status(&self, id: &str, expected_version: u64, to: UpdateStatus) -> Result<Update, KeeperError> {
        let mut update = self.load_expected(id, expected_version).await?;
        let from = update.status;
        update.transition(to, Utc::now())?;

        if to == UpdateStatus::Approved {
            update.snoozed_until = None;
            if from == UpdateStatus::PendingRetry {
                update.retry_count = 0;
                update.next_retry_at = None;
            }
        }

        let saved = self.store.save_update(update, expected_version).await?;
        info!(
            update_id = %saved.id,
            container = %saved.container_name,
            "Update {} -> {}",
            from,
            saved.status
        );
        Ok(saved)
    }
}

fn summary(update: &Update, outcome: ApplyOutcome) -> ApplySummary {
    ApplySummary {
        update_id: update.id.clone(),
        container_name: update.container_name.clone(),
        to_tag: update.to_tag.clone(),
        outcome,
    }
}
