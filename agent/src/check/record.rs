//! Persisting update decisions

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::models::container::{Container, UpdatePolicy};
use crate::models::update::{Update, UpdateStatus};
use crate::storage::traits::Store;
use crate::storage::StorageError;

/// What recording a decision did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    /// A new update row
    Created(Update),

    /// An older open update was pointed at the new target
    Superseded(Update),

    /// Nothing written
    Unchanged,
}

impl Recorded {
    pub fn update(&self) -> Option<&Update> {
        match self {
            Recorded::Created(u) | Recorded::Superseded(u) => Some(u),
            Recorded::Unchanged => None,
        }
    }
}

fn initial_status(policy: UpdatePolicy) -> UpdateStatus {
    match policy {
        UpdatePolicy::Auto => UpdateStatus::Approved,
        UpdatePolicy::Manual | UpdatePolicy::Security | UpdatePolicy::Disabled => UpdateStatus::Pending,
    }
}

/// Record that `container` can move to `target_tag`.
///
/// Never duplicates an update for the same target. Applied updates do not
/// count, so a container rolled back below a target is offered it again.
/// An open pending update
/// (or, for auto containers, an approved one) for an older target is
/// rewritten in place; a snoozed pending update is left alone.
pub async fn record_decision(
    store: &dyn Store,
    container: &Container,
    target_tag: &str,
    now: DateTime<Utc>,
) -> Result<Recorded, StorageError> {
    let existing = store.list_updates_for_container(&container.name).await?;

    if existing
        .iter()
        .any(|u| u.to_tag == target_tag && u.status != UpdateStatus::Applied)
    {
        debug!(container = %container.name, target_tag, "Update already recorded");
        return Ok(Recorded::Unchanged);
    }

    let status = initial_status(container.policy);
    let open = existing.iter().find(|u| {
        u.status == UpdateStatus::Pending || (status == UpdateStatus::Approved && u.status == UpdateStatus::Approved)
    });

    if let Some(open) = open {
        if open.is_snoozed(now) {
            debug!(container = %container.name, update_id = %open.id, "Pending update is snoozed");
            return Ok(Recorded::Unchanged);
        }

        let mut superseded = open.clone();
        let expected = superseded.version;
        superseded.from_tag = container.current_tag.clone();
        superseded.to_tag = target_tag.to_string();
        superseded.snoozed_until = None;
        superseded.updated_at = now;
        if superseded.status == UpdateStatus::Pending && status == UpdateStatus::Approved {
            superseded.status = UpdateStatus::Approved;
        }

        let saved = store.save_update(superseded, expected).await?;
        info!(
            container = %container.name,
            update_id = %saved.id,
            "Superseded update {} -> {}",
            open.to_tag,
            saved.to_tag
        );
        return Ok(Recorded::Superseded(saved));
    }

    let update = Update::new(
        container.name.clone(),
        container.current_tag.clone(),
        target_tag.to_string(),
        status,
        now,
    );
    let saved = store.insert_update(update).await?;
    info!(
        container = %container.name,
        update_id = %saved.id,
        status = %saved.status,
        "Recorded update {} -> {}",
        saved.from_tag,
        saved.to_tag
    );
    Ok(Recorded::Created(saved))
}
