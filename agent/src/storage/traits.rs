//! Store trait definitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::check_job::CheckJob;
use crate::models::container::Container;
use crate::models::restart::{ContainerRestartLog, ContainerRestartState};
use crate::models::update::{Update, UpdateStatus};
use crate::restart::breaker::GateDecision;
use crate::storage::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Gate evaluation run inside a restart transaction.
///
/// Receives the container's state (mutable, persisted on return) and the
/// number of other containers with an attempt inside the trailing window.
pub type GateFn = Box<dyn FnOnce(&mut ContainerRestartState, usize) -> GateDecision + Send>;

/// Combined store
pub trait Store: ContainerStore + UpdateStore + CheckJobStore + RestartStore + Send + Sync {}

impl<T> Store for T where T: ContainerStore + UpdateStore + CheckJobStore + RestartStore + Send + Sync {}

/// Storage for containers
#[async_trait]
pub trait ContainerStore: Send + Sync {
    /// List all containers ordered by name
    async fn list_containers(&self) -> StorageResult<Vec<Container>>;

    async fn get_container(&self, name: &str) -> StorageResult<Option<Container>>;

    /// Create or replace a container
    async fn upsert_container(&self, container: Container) -> StorageResult<()>;
}

/// Storage for update candidates
#[async_trait]
pub trait UpdateStore: Send + Sync {
    /// Insert a new update; the stored copy starts at version 1
    async fn insert_update(&self, update: Update) -> StorageResult<Update>;

    async fn get_update(&self, id: &str) -> StorageResult<Option<Update>>;

    async fn list_updates_for_container(&self, container_name: &str) -> StorageResult<Vec<Update>>;

    async fn list_updates_by_status(&self, status: UpdateStatus) -> StorageResult<Vec<Update>>;

    /// Compare-and-swap write.
    ///
    /// Fails with `VersionConflict` unless the stored version equals
    /// `expected_version`; on success the stored version is bumped.
    async fn save_update(&self, update: Update, expected_version: u64) -> StorageResult<Update>;
}

/// Storage for check jobs
#[async_trait]
pub trait CheckJobStore: Send + Sync {
    /// Insert `job` unless another job is queued or running
    async fn create_job_if_idle(&self, job: CheckJob) -> StorageResult<CheckJob>;

    async fn get_job(&self, id: &str) -> StorageResult<Option<CheckJob>>;

    async fn save_job(&self, job: CheckJob) -> StorageResult<()>;

    /// The queued or running job, if any
    async fn active_job(&self) -> StorageResult<Option<CheckJob>>;

    /// Flag a job for cooperative cancellation; false if it is not active
    async fn request_cancel(&self, id: &str) -> StorageResult<bool>;

    async fn is_cancel_requested(&self, id: &str) -> StorageResult<bool>;
}

/// Storage for restart supervision
#[async_trait]
pub trait RestartStore: Send + Sync {
    async fn get_restart_state(&self, container_name: &str) -> StorageResult<Option<ContainerRestartState>>;

    async fn list_restart_states(&self) -> StorageResult<Vec<ContainerRestartState>>;

    async fn save_restart_state(&self, state: ContainerRestartState) -> StorageResult<()>;

    /// Evaluate the circuit breaker atomically.
    ///
    /// The active-restart count, the evaluation and any state write happen
    /// under one transaction.
    async fn gate_transaction(
        &self,
        container_name: &str,
        window_start: DateTime<Utc>,
        eval: GateFn,
    ) -> StorageResult<GateDecision>;

    /// Persist the state and append the log in one transaction
    async fn record_attempt(
        &self,
        state: ContainerRestartState,
        log: ContainerRestartLog,
    ) -> StorageResult<()>;

    /// Logs for a container, oldest first
    async fn list_restart_logs(&self, container_name: &str) -> StorageResult<Vec<ContainerRestartLog>>;
}
