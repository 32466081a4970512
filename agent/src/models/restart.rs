//! Restart supervision models

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::restart::backoff::BackoffStrategy;
use crate::restart::fsm::RestartPhase;

/// Upper bound on `restart_history` entries
pub const MAX_RESTART_HISTORY: usize = 100;

/// Longest execution output kept in a restart log
pub const MAX_LOGGED_OUTPUT: usize = 4096;

/// What started a restart attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartTrigger {
    Automatic,
    Manual,
}

impl std::fmt::Display for RestartTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartTrigger::Automatic => write!(f, "automatic"),
            RestartTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// Compact attempt record kept on the state row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartHistoryEntry {
    pub at: DateTime<Utc>,
    pub trigger: RestartTrigger,
    pub success: bool,
    pub delay_seconds: f64,
}

/// Per-container circuit breaker and backoff state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRestartState {
    pub container_name: String,

    /// Auto-restart enabled for this container
    pub enabled: bool,

    pub phase: RestartPhase,
    pub consecutive_failures: u32,
    pub current_backoff_seconds: f64,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub max_retries_reached: bool,
    pub paused_until: Option<DateTime<Utc>>,
    pub pause_reason: Option<String>,
    pub last_successful_start: Option<DateTime<Utc>>,

    /// Start of the most recent attempt; feeds the host-wide concurrency cap
    pub last_attempt_at: Option<DateTime<Utc>>,

    pub success_window_seconds: u64,
    pub strategy: BackoffStrategy,
    pub max_attempts: u32,
    pub total_restarts: u64,
    pub restart_history: VecDeque<RestartHistoryEntry>,
}

impl ContainerRestartState {
    /// Create a fresh, healthy state
    pub fn new(
        container_name: impl Into<String>,
        strategy: BackoffStrategy,
        max_attempts: u32,
        success_window_seconds: u64,
    ) -> Self {
        Self {
            container_name: container_name.into(),
            enabled: true,
            phase: RestartPhase::Healthy,
            consecutive_failures: 0,
            current_backoff_seconds: 0.0,
            next_retry_at: None,
            max_retries_reached: false,
            paused_until: None,
            pause_reason: None,
            last_successful_start: None,
            last_attempt_at: None,
            success_window_seconds,
            strategy,
            max_attempts,
            total_restarts: 0,
            restart_history: VecDeque::new(),
        }
    }

    /// Append an attempt, dropping the oldest entries past the bound
    pub fn push_history(&mut self, entry: RestartHistoryEntry) {
        self.restart_history.push_back(entry);
        self.truncate_history();
    }

    pub fn truncate_history(&mut self) {
        while self.restart_history.len() > MAX_RESTART_HISTORY {
            self.restart_history.pop_front();
        }
    }

    /// Pause still in force at `now`
    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.paused_until.is_some_and(|until| until > now)
    }

    /// Seconds since the last successful (re)start
    pub fn uptime_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_successful_start
            .map(|started| (now - started).num_seconds())
    }

    /// Whether the container has stayed up for the full success window.
    ///
    /// Uptime exactly equal to the window counts.
    pub fn success_window_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.uptime_seconds(now) {
            Some(uptime) => uptime >= self.success_window_seconds as i64,
            None => false,
        }
    }
}

/// Outcome of the collaborator call for one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub success: bool,
    pub output: String,
    pub duration_ms: u64,
}

impl ExecutionSummary {
    pub fn new(success: bool, output: &str, duration_ms: u64) -> Self {
        let output = if output.len() > MAX_LOGGED_OUTPUT {
            let mut end = MAX_LOGGED_OUTPUT;
            while !output.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &output[..end])
        } else {
            output.to_string()
        };
        Self {
            success,
            output,
            duration_ms,
        }
    }
}

/// Result of an independent post-restart health probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub healthy: bool,
    pub detail: String,
}

/// Immutable audit record for one restart attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRestartLog {
    pub id: String,
    pub container_name: String,

    /// 1-based attempt number within the current failure streak
    pub attempt: u32,

    pub trigger: RestartTrigger,
    pub reason: String,
    pub delay_seconds: f64,
    pub success: bool,
    pub execution: ExecutionSummary,
    pub health_check: Option<ProbeResult>,
    pub created_at: DateTime<Utc>,
}
