//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::KeeperError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Environment variable overriding the storage root
pub const HOME_ENV: &str = "FLEETKEEPER_HOME";

/// On-disk layout for the daemon
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the container inventory file path
    pub fn inventory_file(&self) -> File {
        File::new(self.base_dir.join("containers.json"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), KeeperError> {
        Dir::new(self.base_dir.clone()).create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = std::env::var_os(HOME_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/etc/fleetkeeper"));
        Self::new(base_dir)
    }
}
