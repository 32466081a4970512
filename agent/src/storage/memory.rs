//! In-memory store implementation

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::models::check_job::CheckJob;
use crate::models::container::Container;
use crate::models::restart::{ContainerRestartLog, ContainerRestartState};
use crate::models::update::{Update, UpdateStatus};
use crate::restart::breaker::GateDecision;
use crate::storage::traits::*;
use crate::storage::StorageError;

#[derive(Debug, Default)]
struct RestartTables {
    states: HashMap<String, ContainerRestartState>,
    logs: Vec<ContainerRestartLog>,
}

/// In-memory store for the daemon and tests.
///
/// Each table sits behind its own lock; operations that must be atomic take
/// exactly one lock for their whole duration.
#[derive(Debug, Default)]
pub struct MemoryStore {
    containers: RwLock<BTreeMap<String, Container>>,
    updates: RwLock<HashMap<String, Update>>,
    jobs: RwLock<HashMap<String, CheckJob>>,
    restarts: RwLock<RestartTables>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with containers
    pub async fn with_containers(containers: impl IntoIterator<Item = Container>) -> Self {
        let store = Self::new();
        {
            let mut table = store.containers.write().await;
            for container in containers {
                table.insert(container.name.clone(), container);
            }
        }
        store
    }
}

#[async_trait]
impl ContainerStore for MemoryStore {
    async fn list_containers(&self) -> StorageResult<Vec<Container>> {
        let containers = self.containers.read().await;
        Ok(containers.values().cloned().collect())
    }

    async fn get_container(&self, name: &str) -> StorageResult<Option<Container>> {
        let containers = self.containers.read().await;
        Ok(containers.get(name).cloned())
    }

    async fn upsert_container(&self, container: Container) -> StorageResult<()> {
        let mut containers = self.containers.write().await;
        containers.insert(container.name.clone(), container);
        Ok(())
    }
}

#[async_trait]
impl UpdateStore for MemoryStore {
    async fn insert_update(&self, mut update: Update) -> StorageResult<Update> {
        let mut updates = self.updates.write().await;
        if updates.contains_key(&update.id) {
            return Err(StorageError::Backend(format!("Duplicate update id {}", update.id)));
        }
        update.version = 1;
        updates.insert(update.id.clone(), update.clone());
        Ok(update)
    }

    async fn get_update(&self, id: &str) -> StorageResult<Option<Update>> {
        let updates = self.updates.read().await;
        Ok(updates.get(id).cloned())
    }

    async fn list_updates_for_container(&self, container_name: &str) -> StorageResult<Vec<Update>> {
        let updates = self.updates.read().await;
        let mut found: Vec<Update> = updates
            .values()
            .filter(|u| u.container_name == container_name)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn list_updates_by_status(&self, status: UpdateStatus) -> StorageResult<Vec<Update>> {
        let updates = self.updates.read().await;
        let mut found: Vec<Update> = updates.values().filter(|u| u.status == status).cloned().collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn save_update(&self, mut update: Update, expected_version: u64) -> StorageResult<Update> {
        let mut updates = self.updates.write().await;
        let stored = updates
            .get(&update.id)
            .ok_or_else(|| StorageError::NotFound(format!("update {}", update.id)))?;

        if stored.version != expected_version {
            return Err(StorageError::VersionConflict {
                id: update.id.clone(),
                expected: expected_version,
                found: stored.version,
            });
        }

        update.version = expected_version + 1;
        updates.insert(update.id.clone(), update.clone());
        Ok(update)
    }
}

#[async_trait]
impl CheckJobStore for MemoryStore {
    async fn create_job_if_idle(&self, job: CheckJob) -> StorageResult<CheckJob> {
        let mut jobs = self.jobs.write().await;
        if let Some(active) = jobs.values().find(|j| j.status.is_active()) {
            return Err(StorageError::JobAlreadyActive(active.id.clone()));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: &str) -> StorageResult<Option<CheckJob>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(id).cloned())
    }

    async fn save_job(&self, mut job: CheckJob) -> StorageResult<()> {
        let mut jobs = self.jobs.write().await;
        // The cancel flag is owned by request_cancel, never cleared by a save
        if let Some(stored) = jobs.get(&job.id) {
            job.cancel_requested |= stored.cancel_requested;
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn active_job(&self) -> StorageResult<Option<CheckJob>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().find(|j| j.status.is_active()).cloned())
    }

    async fn request_cancel(&self, id: &str) -> StorageResult<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(id) {
            Some(job) if job.status.is_active() => {
                job.cancel_requested = true;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StorageError::NotFound(format!("check job {}", id))),
        }
    }

    async fn is_cancel_requested(&self, id: &str) -> StorageResult<bool> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(id).is_some_and(|j| j.cancel_requested))
    }
}

#[async_trait]
impl RestartStore for MemoryStore {
    async fn get_restart_state(&self, container_name: &str) -> StorageResult<Option<ContainerRestartState>> {
        let tables = self.restarts.read().await;
        Ok(tables.states.get(container_name).cloned())
    }

    async fn list_restart_states(&self) -> StorageResult<Vec<ContainerRestartState>> {
        let tables = self.restarts.read().await;
        let mut states: Vec<_> = tables.states.values().cloned().collect();
        states.sort_by(|a, b| a.container_name.cmp(&b.container_name));
        Ok(states)
    }

    async fn save_restart_state(&self, state: ContainerRestartState) -> StorageResult<()> {
        let mut tables = self.restarts.write().await;
        tables.states.insert(state.container_name.clone(), state);
        Ok(())
    }

    async fn gate_transaction(
        &self,
        container_name: &str,
        window_start: DateTime<Utc>,
        eval: GateFn,
    ) -> StorageResult<GateDecision> {
        let mut tables = self.restarts.write().await;

        let active = tables
            .states
            .values()
            .filter(|s| s.container_name != container_name)
            .filter(|s| s.last_attempt_at.is_some_and(|at| at >= window_start))
            .count();

        let state = tables
            .states
            .get_mut(container_name)
            .ok_or_else(|| StorageError::NotFound(format!("restart state {}", container_name)))?;

        Ok(eval(state, active))
    }

    async fn record_attempt(
        &self,
        state: ContainerRestartState,
        log: ContainerRestartLog,
    ) -> StorageResult<()> {
        let mut tables = self.restarts.write().await;
        tables.states.insert(state.container_name.clone(), state);
        tables.logs.push(log);
        Ok(())
    }

    async fn list_restart_logs(&self, container_name: &str) -> StorageResult<Vec<ContainerRestartLog>> {
        let tables = self.restarts.read().await;
        Ok(tables
            .logs
            .iter()
            .filter(|l| l.container_name == container_name)
            .cloned()
            .collect())
    }
}
