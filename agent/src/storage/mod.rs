//! Persistence, settings and on-disk layout

pub mod inventory;
pub mod layout;
pub mod memory;
pub mod settings;
pub mod traits;

use thiserror::Error;

/// Errors raised by a store implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version conflict on {id}: expected {expected}, found {found}")]
    VersionConflict { id: String, expected: u64, found: u64 },

    #[error("Check job {0} is already active")]
    JobAlreadyActive(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}
