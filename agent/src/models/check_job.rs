//! Check job models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one "check all containers" run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Canceled,
    Failed,
}

impl JobStatus {
    /// Queued or running jobs block new triggers
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

/// Result of checking a single container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckOutcome {
    UpToDate,
    UpdateAvailable { target_tag: String },
    Error { message: String },
}

/// Per-container record kept on the job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerCheckResult {
    pub container_name: String,
    pub outcome: CheckOutcome,

    /// Whether a new or superseded update row was written
    pub update_recorded: bool,

    pub checked_at: DateTime<Utc>,
}

/// One orchestration run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckJob {
    pub id: String,
    pub status: JobStatus,
    pub total_count: usize,

    /// Containers processed so far, errored ones included
    pub checked_count: usize,

    pub updates_found: usize,
    pub errors_count: usize,
    pub cancel_requested: bool,
    pub results: Vec<ContainerCheckResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CheckJob {
    /// Create a queued job
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            id: crate::utils::generate_uuid(),
            status: JobStatus::Queued,
            total_count: 0,
            checked_count: 0,
            updates_found: 0,
            errors_count: 0,
            cancel_requested: false,
            results: Vec::new(),
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Fold one container result into the counters
    pub fn record(&mut self, result: ContainerCheckResult) {
        self.checked_count += 1;
        match &result.outcome {
            CheckOutcome::UpToDate => {}
            CheckOutcome::UpdateAvailable { .. } => self.updates_found += 1,
            CheckOutcome::Error { .. } => self.errors_count += 1,
        }
        self.results.push(result);
    }

    /// Move to a terminal status
    pub fn finish(&mut self, status: JobStatus, now: DateTime<Utc>) {
        self.status = status;
        self.finished_at = Some(now);
    }
}
