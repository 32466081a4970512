//! Container inventory file

use tracing::{info, warn};

use crate::errors::KeeperError;
use crate::filesys::file::File;
use crate::models::container::Container;
use crate::storage::traits::ContainerStore;

/// Load `containers.json` into the store.
///
/// A missing file is an empty inventory. Returns the number of containers
/// loaded.
pub async fn load_inventory(file: &File, store: &dyn ContainerStore) -> Result<usize, KeeperError> {
    if !file.exists().await {
        warn!("No inventory at {}, starting with no containers", file.path().display());
        return Ok(0);
    }

    let containers: Vec<Container> = file.read_json().await?;
    let mut seen = std::collections::HashSet::new();
    for container in &containers {
        if !seen.insert(container.name.as_str()) {
            return Err(KeeperError::ValidationError(format!(
                "Duplicate container name in inventory: {}",
                container.name
            )));
        }
    }

    let count = containers.len();
    for container in containers {
        store.upsert_container(container).await?;
    }
    info!("Loaded {} containers from {}", count, file.path().display());
    Ok(count)
}

/// Write the store's containers back to the inventory file
pub async fn save_inventory(file: &File, store: &dyn ContainerStore) -> Result<(), KeeperError> {
    let containers = store.list_containers().await?;
    file.write_json(&containers).await
}
