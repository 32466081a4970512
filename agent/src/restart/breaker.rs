//! Circuit breaker gate evaluated before every restart attempt

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::restart::ContainerRestartState;
use crate::restart::fsm::{RestartEvent, RestartFsm, RestartPhase};

/// Why a restart attempt was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    /// Operator pause still in force
    Paused { until: DateTime<Utc> },

    /// The failure streak reached the limit
    MaxAttempts { max: u32 },

    /// Auto-restart turned off for the container
    Disabled,

    /// Too many containers restarted inside the trailing window
    ConcurrencyLimit { active: usize, cap: usize },
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::Paused { until } => write!(f, "paused until {}", until.to_rfc3339()),
            BlockReason::MaxAttempts { max } => {
                write!(f, "maximum retry attempts ({}) reached, manual reset required", max)
            }
            BlockReason::Disabled => write!(f, "auto-restart disabled"),
            BlockReason::ConcurrencyLimit { active, cap } => {
                write!(f, "restart concurrency limit reached ({}/{})", active, cap)
            }
        }
    }
}

/// Gate verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Blocked(BlockReason),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

/// Evaluate the gate for one container.
///
/// `active` counts other containers with an attempt inside the concurrency
/// window. An expired pause is cleared on `state` before the remaining checks
/// run; the caller persists `state` in the same transaction.
pub fn evaluate_gate(
    state: &mut ContainerRestartState,
    active: usize,
    cap: usize,
    now: DateTime<Utc>,
) -> GateDecision {
    if let Some(until) = state.paused_until {
        if until > now {
            return GateDecision::Blocked(BlockReason::Paused { until });
        }
        clear_expired_pause(state);
    }

    if state.max_retries_reached || state.phase == RestartPhase::Exhausted {
        return GateDecision::Blocked(BlockReason::MaxAttempts {
            max: state.max_attempts,
        });
    }

    if !state.enabled {
        return GateDecision::Blocked(BlockReason::Disabled);
    }

    if active >= cap {
        return GateDecision::Blocked(BlockReason::ConcurrencyLimit { active, cap });
    }

    GateDecision::Allow
}

/// Drop an elapsed pause and return the phase to where it was paused from
pub fn clear_expired_pause(state: &mut ContainerRestartState) {
    info!(container = %state.container_name, "Restart pause expired");
    state.paused_until = None;
    state.pause_reason = None;

    if state.phase == RestartPhase::Paused {
        let mut fsm = RestartFsm::restore(
            state.phase,
            state.consecutive_failures,
            state.max_attempts,
            resume_attempt(state),
        );
        if let Ok(phase) = fsm.process(RestartEvent::PauseExpired) {
            state.phase = phase;
        }
    }
}

/// Backoff attempt a paused container resumes, `None` when it was healthy
pub fn resume_attempt(state: &ContainerRestartState) -> Option<u32> {
    if state.next_retry_at.is_some() && state.consecutive_failures > 0 {
        Some(state.consecutive_failures - 1)
    } else {
        None
    }
}
