//! Finite state machine for container restart supervision

use serde::{Deserialize, Serialize};

/// Restart phase of a container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RestartPhase {
    /// Running, or never failed
    #[default]
    Healthy,

    /// Waiting out the delay before retry `attempt` (zero based)
    Backoff { attempt: u32 },

    /// A restart is being executed
    Attempting,

    /// Operator pause, expires on its own
    Paused,

    /// Out of attempts, needs a manual reset
    Exhausted,
}

/// Restart event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartEvent {
    /// The container exited without being asked to
    UnexpectedExit,

    /// The backoff delay elapsed
    DelayElapsed,

    /// Operator requested a restart now
    ManualTrigger,

    /// The restart (and health probe, if any) succeeded
    AttemptSucceeded,

    /// The restart or its health probe failed
    AttemptFailed,

    /// Operator pause
    Pause,

    /// The pause window ran out
    PauseExpired,

    /// Attempts exceeded
    Exhaust,

    /// Manual reset
    Reset,
}

/// Restart FSM
///
/// Tracks the phase together with the failure streak that drives the
/// backoff exponent. `max_attempts` bounds the streak; a successful attempt
/// ends it.
#[derive(Debug, Clone)]
pub struct RestartFsm {
    phase: RestartPhase,
    consecutive_failures: u32,
    max_attempts: u32,
    resume_attempt: Option<u32>,
}

impl RestartFsm {
    /// Create a new FSM in healthy state
    pub fn new(max_attempts: u32) -> Self {
        Self {
            phase: RestartPhase::Healthy,
            consecutive_failures: 0,
            max_attempts,
            resume_attempt: None,
        }
    }

    /// Rebuild an FSM from persisted fields.
    ///
    /// `resume_attempt` is the backoff attempt a paused container returns to
    /// once the pause expires, `None` to return to healthy.
    pub fn restore(
        phase: RestartPhase,
        consecutive_failures: u32,
        max_attempts: u32,
        resume_attempt: Option<u32>,
    ) -> Self {
        Self {
            phase,
            consecutive_failures,
            max_attempts,
            resume_attempt,
        }
    }

    /// Get current phase
    pub fn phase(&self) -> RestartPhase {
        self.phase
    }

    /// Get the failure streak
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Process an event and transition phase
    pub fn process(&mut self, event: RestartEvent) -> Result<RestartPhase, String> {
        let new_phase = match (self.phase, &event) {
            // Exhausted is sticky
            (RestartPhase::Exhausted, RestartEvent::Reset) => {
                self.consecutive_failures = 0;
                RestartPhase::Healthy
            }
            (RestartPhase::Exhausted, RestartEvent::Exhaust) => RestartPhase::Exhausted,
            (RestartPhase::Exhausted, event) => {
                return Err(format!(
                    "Invalid transition: {:?} -> {:?} (reset required)",
                    self.phase, event
                ));
            }

            // From any non-exhausted phase
            (_, RestartEvent::Reset) => {
                self.consecutive_failures = 0;
                self.resume_attempt = None;
                RestartPhase::Healthy
            }
            (_, RestartEvent::Exhaust) => RestartPhase::Exhausted,
            (RestartPhase::Paused, RestartEvent::Pause) => RestartPhase::Paused,
            (phase, RestartEvent::Pause) => {
                self.resume_attempt = match phase {
                    RestartPhase::Backoff { attempt } => Some(attempt),
                    _ => None,
                };
                RestartPhase::Paused
            }

            // From Healthy
            (RestartPhase::Healthy, RestartEvent::UnexpectedExit) => self.fail(),
            (RestartPhase::Healthy, RestartEvent::ManualTrigger) => RestartPhase::Attempting,

            // From Backoff
            (RestartPhase::Backoff { .. }, RestartEvent::DelayElapsed) => RestartPhase::Attempting,
            (RestartPhase::Backoff { .. }, RestartEvent::ManualTrigger) => RestartPhase::Attempting,

            // From Attempting
            (RestartPhase::Attempting, RestartEvent::AttemptSucceeded) => {
                self.consecutive_failures = 0;
                RestartPhase::Healthy
            }
            (RestartPhase::Attempting, RestartEvent::AttemptFailed) => self.fail(),

            // From Paused
            (RestartPhase::Paused, RestartEvent::PauseExpired) => match self.resume_attempt.take() {
                Some(attempt) => RestartPhase::Backoff { attempt },
                None => RestartPhase::Healthy,
            },
            (RestartPhase::Paused, RestartEvent::ManualTrigger) => {
                self.resume_attempt = None;
                RestartPhase::Attempting
            }

            // Invalid transitions
            (phase, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", phase, event));
            }
        };

        self.phase = new_phase;
        Ok(new_phase)
    }

    /// Clear the failure streak after a long enough healthy run
    pub fn forgive(&mut self) -> Result<(), String> {
        match self.phase {
            RestartPhase::Healthy | RestartPhase::Exhausted => {
                self.consecutive_failures = 0;
                self.phase = RestartPhase::Healthy;
                Ok(())
            }
            phase => Err(format!("Cannot forgive failures while {:?}", phase)),
        }
    }

    fn fail(&mut self) -> RestartPhase {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.max_attempts {
            RestartPhase::Exhausted
        } else {
            RestartPhase::Backoff {
                attempt: self.consecutive_failures - 1,
            }
        }
    }
}
