//! Error types for fleetkeeper

use thiserror::Error;

use crate::models::update::TransitionError;
use crate::registry::RegistryError;
use crate::scheduler::CycleError;
use crate::storage::StorageError;

/// Main error type for fleetkeeper
#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Registry error: {0}")]
    RegistryError(#[from] RegistryError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("A check job is already active: {0}")]
    JobAlreadyActive(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for KeeperError {
    fn from(err: anyhow::Error) -> Self {
        KeeperError::Internal(err.to_string())
    }
}
