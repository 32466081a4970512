//! Shared fakes for the integration tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use fleetkeeper::cache::tags::TagCache;
use fleetkeeper::check::orchestrator::{CheckOptions, CheckOrchestrator};
use fleetkeeper::deploy::{ContainerStatus, ExecutionResult, Executor, HealthProbe, Intent, LivenessProbe};
use fleetkeeper::errors::KeeperError;
use fleetkeeper::events::{EventSink, LifecycleEvent};
use fleetkeeper::models::check_job::{CheckJob, JobStatus};
use fleetkeeper::models::container::Container;
use fleetkeeper::models::restart::{ContainerRestartLog, ContainerRestartState, ProbeResult};
use fleetkeeper::models::update::{Update, UpdateStatus};
use fleetkeeper::registry::limiter::SemaphoreRateLimiter;
use fleetkeeper::registry::{RegistryError, TagSource};
use fleetkeeper::resolver::TagResolver;
use fleetkeeper::restart::breaker::GateDecision;
use fleetkeeper::storage::memory::MemoryStore;
use fleetkeeper::storage::traits::{
    CheckJobStore, ContainerStore, GateFn, RestartStore, StorageResult, Store, UpdateStore,
};
use fleetkeeper::storage::StorageError;

/// Tag source serving canned tag lists and counting fetches
#[derive(Default)]
pub struct FakeTagSource {
    tags: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
    delay: Duration,
    fetches: AtomicUsize,
}

impl FakeTagSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags(mut self, image: &str, tags: &[&str]) -> Self {
        self.tags
            .insert(image.to_string(), tags.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn failing(mut self, image: &str) -> Self {
        self.failing.insert(image.to_string());
        self
    }

    /// Every fetch sleeps this long
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TagSource for FakeTagSource {
    async fn list_tags(&self, _registry: &str, image: &str) -> Result<Vec<String>, RegistryError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(image) {
            return Err(RegistryError::Status {
                status: 503,
                body: "registry unavailable".to_string(),
            });
        }
        Ok(self.tags.get(image).cloned().unwrap_or_default())
    }
}

/// Executor recording intents; containers in the failing set fail
#[derive(Default)]
pub struct FakeExecutor {
    intents: Mutex<Vec<Intent>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, container: &str) {
        self.failing.lock().unwrap().insert(container.to_string());
    }

    pub fn recover(&self, container: &str) {
        self.failing.lock().unwrap().remove(container);
    }

    pub fn intents(&self) -> Vec<Intent> {
        self.intents.lock().unwrap().clone()
    }

    /// Containers touched, in call order
    pub fn containers(&self) -> Vec<String> {
        self.intents().iter().map(|i| i.container().to_string()).collect()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(&self, intent: Intent) -> ExecutionResult {
        let fails = self.failing.lock().unwrap().contains(intent.container());
        self.intents.lock().unwrap().push(intent);
        ExecutionResult {
            success: !fails,
            output: if fails { "exit status 1".to_string() } else { "ok".to_string() },
            duration: Duration::from_millis(3),
        }
    }
}

/// Health probe with a switchable verdict
pub struct FakeProbe {
    healthy: AtomicBool,
}

impl FakeProbe {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn probe(&self, _container: &str) -> ProbeResult {
        let healthy = self.healthy.load(Ordering::SeqCst);
        ProbeResult {
            healthy,
            detail: if healthy { "running".to_string() } else { "container not running".to_string() },
        }
    }
}

/// Liveness probe reporting the containers in its exited set as stopped
#[derive(Default)]
pub struct FakeLiveness {
    exited: Mutex<HashSet<String>>,
}

impl FakeLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_exited(&self, container: &str, exited: bool) {
        let mut set = self.exited.lock().unwrap();
        if exited {
            set.insert(container.to_string());
        } else {
            set.remove(container);
        }
    }
}

#[async_trait]
impl LivenessProbe for FakeLiveness {
    async fn status(&self, container: &str) -> Result<ContainerStatus, KeeperError> {
        if self.exited.lock().unwrap().contains(container) {
            Ok(ContainerStatus::Exited)
        } else {
            Ok(ContainerStatus::Running)
        }
    }
}

/// Sink keeping every event
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }
}

impl EventSink for CollectingSink {
    fn publish(&self, event: LifecycleEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub async fn store_with(containers: Vec<Container>) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_containers(containers).await)
}

/// Memory store with injectable write failures
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_progress: AtomicBool,
    fail_inserts: Mutex<HashSet<String>>,
}

impl FaultyStore {
    pub async fn with_containers(containers: Vec<Container>) -> Self {
        Self {
            inner: MemoryStore::with_containers(containers).await,
            ..Default::default()
        }
    }

    /// Fail every job write made while results are coming in
    pub fn fail_progress_writes(&self) {
        self.fail_progress.store(true, Ordering::SeqCst);
    }

    /// Fail inserting updates for `container`
    pub fn fail_inserts_for(&self, container: &str) {
        self.fail_inserts.lock().unwrap().insert(container.to_string());
    }
}

fn backend_down() -> StorageError {
    StorageError::Backend("disk full".to_string())
}

#[async_trait]
impl ContainerStore for FaultyStore {
    async fn list_containers(&self) -> StorageResult<Vec<Container>> {
        self.inner.list_containers().await
    }

    async fn get_container(&self, name: &str) -> StorageResult<Option<Container>> {
        self.inner.get_container(name).await
    }

    async fn upsert_container(&self, container: Container) -> StorageResult<()> {
        self.inner.upsert_container(container).await
    }
}

#[async_trait]
impl UpdateStore for FaultyStore {
    async fn insert_update(&self, update: Update) -> StorageResult<Update> {
        if self.fail_inserts.lock().unwrap().contains(&update.container_name) {
            return Err(backend_down());
        }
        self.inner.insert_update(update).await
    }

    async fn get_update(&self, id: &str) -> StorageResult<Option<Update>> {
        self.inner.get_update(id).await
    }

    async fn list_updates_for_container(&self, container_name: &str) -> StorageResult<Vec<Update>> {
        self.inner.list_updates_for_container(container_name).await
    }

    async fn list_updates_by_status(&self, status: UpdateStatus) -> StorageResult<Vec<Update>> {
        self.inner.list_updates_by_status(status).await
    }

    async fn save_update(&self, update: Update, expected_version: u64) -> StorageResult<Update> {
        self.inner.save_update(update, expected_version).await
    }
}

#[async_trait]
impl CheckJobStore for FaultyStore {
    async fn create_job_if_idle(&self, job: CheckJob) -> StorageResult<CheckJob> {
        self.inner.create_job_if_idle(job).await
    }

    async fn get_job(&self, id: &str) -> StorageResult<Option<CheckJob>> {
        self.inner.get_job(id).await
    }

    async fn save_job(&self, job: CheckJob) -> StorageResult<()> {
        let progress = job.status == JobStatus::Running && job.checked_count > 0;
        if progress && self.fail_progress.load(Ordering::SeqCst) {
            return Err(backend_down());
        }
        self.inner.save_job(job).await
    }

    async fn active_job(&self) -> StorageResult<Option<CheckJob>> {
        self.inner.active_job().await
    }

    async fn request_cancel(&self, id: &str) -> StorageResult<bool> {
        self.inner.request_cancel(id).await
    }

    async fn is_cancel_requested(&self, id: &str) -> StorageResult<bool> {
        self.inner.is_cancel_requested(id).await
    }
}

#[async_trait]
impl RestartStore for FaultyStore {
    async fn get_restart_state(&self, container_name: &str) -> StorageResult<Option<ContainerRestartState>> {
        self.inner.get_restart_state(container_name).await
    }

    async fn list_restart_states(&self) -> StorageResult<Vec<ContainerRestartState>> {
        self.inner.list_restart_states().await
    }

    async fn save_restart_state(&self, state: ContainerRestartState) -> StorageResult<()> {
        self.inner.save_restart_state(state).await
    }

    async fn gate_transaction(
        &self,
        container_name: &str,
        window_start: DateTime<Utc>,
        eval: GateFn,
    ) -> StorageResult<GateDecision> {
        self.inner.gate_transaction(container_name, window_start, eval).await
    }

    async fn record_attempt(&self, state: ContainerRestartState, log: ContainerRestartLog) -> StorageResult<()> {
        self.inner.record_attempt(state, log).await
    }

    async fn list_restart_logs(&self, container_name: &str) -> StorageResult<Vec<ContainerRestartLog>> {
        self.inner.list_restart_logs(container_name).await
    }
}

/// Orchestrator over `store` and `source` with the tag cache disabled
pub fn orchestrator(
    store: Arc<dyn Store>,
    source: Arc<FakeTagSource>,
    events: Arc<CollectingSink>,
    options: CheckOptions,
) -> CheckOrchestrator {
    let resolver = TagResolver::new(
        source,
        Arc::new(SemaphoreRateLimiter::new(2)),
        Arc::new(TagCache::new(Duration::ZERO, 64)),
    );
    CheckOrchestrator::new(store, Arc::new(resolver), events, options)
}
