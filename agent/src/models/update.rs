//! Update candidate models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of an update candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Pending,
    Approved,
    Rejected,
    Applied,
    PendingRetry,
}

impl UpdateStatus {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: UpdateStatus) -> bool {
        use UpdateStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Applied)
                | (Approved, PendingRetry)
                | (Approved, Rejected)
                | (PendingRetry, Approved)
                | (PendingRetry, Applied)
                | (PendingRetry, PendingRetry)
                | (PendingRetry, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UpdateStatus::Applied | UpdateStatus::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UpdateStatus::Pending => "pending",
            UpdateStatus::Approved => "approved",
            UpdateStatus::Rejected => "rejected",
            UpdateStatus::Applied => "applied",
            UpdateStatus::PendingRetry => "pending_retry",
        }
    }
}

impl std::fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status change
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid transition for update {update_id}: {from} -> {to}")]
pub struct TransitionError {
    pub update_id: String,
    pub from: UpdateStatus,
    pub to: UpdateStatus,
}

/// A detected version transition for one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub id: String,
    pub container_name: String,
    pub from_tag: String,
    pub to_tag: String,
    pub status: UpdateStatus,

    /// Optimistic lock counter, bumped by the store on every write
    pub version: u64,

    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Update {
    /// Create a new update candidate
    pub fn new(
        container_name: impl Into<String>,
        from_tag: impl Into<String>,
        to_tag: impl Into<String>,
        status: UpdateStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: crate::utils::generate_uuid(),
            container_name: container_name.into(),
            from_tag: from_tag.into(),
            to_tag: to_tag.into(),
            status,
            version: 0,
            retry_count: 0,
            next_retry_at: None,
            snoozed_until: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `to`, rejecting illegal transitions
    pub fn transition(&mut self, to: UpdateStatus, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                update_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snoozed_until.is_some_and(|until| until > now)
    }

    /// An update waiting in `pending_retry` whose retry time has come
    pub fn is_due_for_retry(&self, now: DateTime<Utc>) -> bool {
        self.status == UpdateStatus::PendingRetry && self.next_retry_at.is_some_and(|at| at <= now)
    }
}
