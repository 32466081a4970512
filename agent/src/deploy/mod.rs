//! Execution collaborators: applying tags, restarting, probing

pub mod command;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::KeeperError;
use crate::models::restart::ProbeResult;

/// What the core asks the outside world to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intent {
    /// Point a container at a new image tag and redeploy it
    SetTag {
        container: String,
        image: String,
        tag: String,
    },

    /// Restart a container in place
    Restart { container: String },
}

impl Intent {
    pub fn container(&self) -> &str {
        match self {
            Intent::SetTag { container, .. } | Intent::Restart { container } => container,
        }
    }
}

/// Result of running an intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn failed(output: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            output: output.into(),
            duration,
        }
    }
}

/// Runs intents. Failures are reported in the result, never raised.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, intent: Intent) -> ExecutionResult;
}

/// Post-restart health check
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, container: &str) -> ProbeResult;
}

/// Observed run state of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Exited,
    Unknown,
}

/// Detects containers that stopped on their own
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn status(&self, container: &str) -> Result<ContainerStatus, KeeperError>;
}
