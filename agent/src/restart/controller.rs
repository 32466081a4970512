//! Restart controller: drives the per-container FSM against the store

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, warn};

use crate::deploy::{Executor, HealthProbe, Intent};
use crate::errors::KeeperError;
use crate::events::{EventSink, LifecycleEvent};
use crate::models::restart::{
    ContainerRestartLog, ContainerRestartState, ExecutionSummary, RestartHistoryEntry, RestartTrigger,
};
use crate::restart::backoff::BackoffStrategy;
use crate::restart::breaker::{clear_expired_pause, evaluate_gate, resume_attempt, BlockReason, GateDecision};
use crate::restart::fsm::{RestartEvent, RestartFsm, RestartPhase};
use crate::storage::settings::SettingsProvider;
use crate::storage::traits::Store;

/// Restart options, applied to containers seen for the first time
#[derive(Debug, Clone)]
pub struct RestartOptions {
    pub strategy: BackoffStrategy,
    pub max_attempts: u32,
    pub success_window_seconds: u64,

    /// Containers allowed to restart inside one concurrency window
    pub max_concurrent: usize,
    pub concurrency_window: Duration,

    /// Wait between a restart and its health probe
    pub startup_delay: Duration,
}

impl Default for RestartOptions {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::default(),
            max_attempts: 10,
            success_window_seconds: 300,
            max_concurrent: 3,
            concurrency_window: Duration::from_secs(300),
            startup_delay: Duration::from_secs(5),
        }
    }
}

impl RestartOptions {
    pub fn from_settings(settings: &dyn SettingsProvider) -> Self {
        let defaults = Self::default();
        let strategy = settings.get_string("restart.strategy", "exponential");
        Self {
            strategy: BackoffStrategy::from_name(&strategy, settings),
            max_attempts: settings
                .get_int("restart.max_attempts", defaults.max_attempts as i64)
                .max(1) as u32,
            success_window_seconds: settings
                .get_int("restart.success_window_seconds", defaults.success_window_seconds as i64)
                .max(0) as u64,
            max_concurrent: settings
                .get_int("restart.max_concurrent", defaults.max_concurrent as i64)
                .max(1) as usize,
            concurrency_window: Duration::from_secs(
                settings
                    .get_int(
                        "restart.concurrency_window_seconds",
                        defaults.concurrency_window.as_secs() as i64,
                    )
                    .max(0) as u64,
            ),
            startup_delay: Duration::from_secs_f64(
                settings
                    .get_float(
                        "restart.startup_delay_seconds",
                        defaults.startup_delay.as_secs_f64(),
                    )
                    .max(0.0),
            ),
        }
    }
}

/// Result of [`RestartController::attempt`]
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The gate refused; nothing was executed
    Blocked(BlockReason),

    Succeeded {
        attempt: u32,
    },

    Failed {
        attempt: u32,
        next_retry_at: Option<DateTime<Utc>>,
    },
}

/// Supervises container restarts.
///
/// Each container is only ever mutated by the controller acting on it; the
/// cross-container concurrency cap is enforced inside the store's gate
/// transaction.
pub struct RestartController {
    store: Arc<dyn Store>,
    executor: Arc<dyn Executor>,
    health: Option<Arc<dyn HealthProbe>>,
    events: Arc<dyn EventSink>,
    options: RestartOptions,
    rng: Mutex<StdRng>,
}

impl RestartController {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<dyn Executor>,
        health: Option<Arc<dyn HealthProbe>>,
        events: Arc<dyn EventSink>,
        options: RestartOptions,
    ) -> Self {
        Self {
            store,
            executor,
            health,
            events,
            options,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic jitter
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn options(&self) -> &RestartOptions {
        &self.options
    }

    pub async fn state(&self, name: &str) -> Result<Option<ContainerRestartState>, KeeperError> {
        Ok(self.store.get_restart_state(name).await?)
    }

    /// Attempt log for a container, oldest first
    pub async fn logs(&self, name: &str) -> Result<Vec<ContainerRestartLog>, KeeperError> {
        Ok(self.store.list_restart_logs(name).await?)
    }

    pub async fn enable(&self, name: &str) -> Result<ContainerRestartState, KeeperError> {
        self.set_enabled(name, true).await
    }

    pub async fn disable(&self, name: &str) -> Result<ContainerRestartState, KeeperError> {
        self.set_enabled(name, false).await
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<ContainerRestartState, KeeperError> {
        let mut state = self.load_or_new(name).await?;
        state.enabled = enabled;
        self.store.save_restart_state(state.clone()).await?;
        info!(container = %name, enabled, "Auto-restart toggled");
        Ok(state)
    }

    /// Record that a container stopped without being asked to.
    ///
    /// Schedules the first retry, or marks the container exhausted when the
    /// streak is already at the limit. Exits of containers that are not
    /// healthy (already backing off, paused or exhausted) are ignored.
    pub async fn record_exit(&self, name: &str, now: DateTime<Utc>) -> Result<ContainerRestartState, KeeperError> {
        let mut state = self.load_or_new(name).await?;
        if !state.enabled {
            debug!(container = %name, "Auto-restart disabled, ignoring exit");
            return Ok(state);
        }

        let pause_expired = state.phase == RestartPhase::Paused && !state.is_paused(now);
        if pause_expired {
            clear_expired_pause(&mut state);
        }
        if state.phase != RestartPhase::Healthy {
            debug!(container = %name, phase = ?state.phase, "Exit ignored outside healthy phase");
            if pause_expired {
                self.store.save_restart_state(state.clone()).await?;
            }
            return Ok(state);
        }

        let mut fsm = self.fsm(&state);
        let phase = fsm
            .process(RestartEvent::UnexpectedExit)
            .map_err(KeeperError::ValidationError)?;
        state.phase = phase;
        state.consecutive_failures = fsm.consecutive_failures();
        warn!(container = %name, failures = state.consecutive_failures, "Container exited unexpectedly");

        self.after_failure(&mut state, now);
        self.store.save_restart_state(state.clone()).await?;
        Ok(state)
    }

    /// Containers whose backoff delay has elapsed, earliest first.
    ///
    /// Includes containers whose pause has run out and that were backing off
    /// when paused; the gate clears the pause on the next attempt.
    pub async fn due_for_retry(&self, now: DateTime<Utc>) -> Result<Vec<String>, KeeperError> {
        let mut due: Vec<(DateTime<Utc>, String)> = self
            .store
            .list_restart_states()
            .await?
            .into_iter()
            .filter(|s| s.enabled && !s.is_paused(now))
            .filter(|s| match s.phase {
                RestartPhase::Backoff { .. } => true,
                RestartPhase::Paused => resume_attempt(s).is_some(),
                _ => false,
            })
            .filter_map(|s| match s.next_retry_at {
                Some(at) if at <= now => Some((at, s.container_name)),
                _ => None,
            })
            .collect();
        due.sort();
        Ok(due.into_iter().map(|(_, name)| name).collect())
    }

    /// Run one restart attempt.
    ///
    /// Every attempt passes the circuit breaker first. Manual attempts are
    /// exempt from the concurrency cap only.
    pub async fn attempt(&self, name: &str, trigger: RestartTrigger) -> Result<AttemptOutcome, KeeperError> {
        let now = Utc::now();
        self.load_or_new(name).await?;

        let window = chrono::Duration::from_std(self.options.concurrency_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let cap = match trigger {
            RestartTrigger::Automatic => self.options.max_concurrent,
            RestartTrigger::Manual => usize::MAX,
        };
        let decision = self
            .store
            .gate_transaction(
                name,
                now - window,
                Box::new(move |state: &mut ContainerRestartState, active: usize| {
                    evaluate_gate(state, active, cap, now)
                }),
            )
            .await?;
        if let GateDecision::Blocked(reason) = decision {
            info!(container = %name, %trigger, "Restart blocked: {}", reason);
            return Ok(AttemptOutcome::Blocked(reason));
        }
        // The gate may have cleared an expired pause
        let mut state = self.load_existing(name).await?;

        let from_backoff = matches!(state.phase, RestartPhase::Backoff { .. });
        let event = match trigger {
            RestartTrigger::Automatic => RestartEvent::DelayElapsed,
            RestartTrigger::Manual => RestartEvent::ManualTrigger,
        };
        let mut fsm = self.fsm(&state);
        state.phase = fsm.process(event).map_err(KeeperError::ValidationError)?;

        let attempt = if from_backoff {
            state.consecutive_failures.max(1)
        } else {
            state.consecutive_failures + 1
        };
        let delay_seconds = match trigger {
            RestartTrigger::Automatic => state.current_backoff_seconds,
            RestartTrigger::Manual => 0.0,
        };
        state.paused_until = None;
        state.pause_reason = None;
        state.last_attempt_at = Some(now);
        self.store.save_restart_state(state.clone()).await?;

        info!(container = %name, attempt, %trigger, "Restarting container");
        self.events.publish(LifecycleEvent::RestartAttempted {
            container_name: name.to_string(),
            attempt,
            trigger,
        });

        let started = Instant::now();
        let result = self
            .executor
            .execute(Intent::Restart {
                container: name.to_string(),
            })
            .await;

        let health_check = match (&self.health, result.success) {
            (Some(probe), true) => {
                if !self.options.startup_delay.is_zero() {
                    tokio::time::sleep(self.options.startup_delay).await;
                }
                Some(probe.probe(name).await)
            }
            _ => None,
        };
        let success = result.success && health_check.as_ref().map_or(true, |p| p.healthy);
        let finished = Utc::now();

        let mut fsm = self.fsm(&state);
        let outcome_event = if success {
            RestartEvent::AttemptSucceeded
        } else {
            RestartEvent::AttemptFailed
        };
        state.phase = fsm.process(outcome_event).map_err(KeeperError::ValidationError)?;
        state.consecutive_failures = fsm.consecutive_failures();
        state.total_restarts = state.total_restarts.saturating_add(1);

        let error_text = if !result.success {
            format!("restart failed: {}", result.output.trim())
        } else if let Some(probe) = health_check.as_ref().filter(|p| !p.healthy) {
            format!("health check failed: {}", probe.detail)
        } else {
            String::new()
        };

        let outcome = if success {
            state.last_successful_start = Some(finished);
            state.next_retry_at = None;
            info!(container = %name, attempt, "Restart succeeded");
            self.events.publish(LifecycleEvent::RestartSucceeded {
                container_name: name.to_string(),
                attempt,
            });
            AttemptOutcome::Succeeded { attempt }
        } else {
            error!(container = %name, attempt, "{}", error_text);
            self.after_failure(&mut state, finished);
            self.events.publish(LifecycleEvent::RestartFailed {
                container_name: name.to_string(),
                attempt,
                error: error_text.clone(),
                next_retry_at: state.next_retry_at,
            });
            AttemptOutcome::Failed {
                attempt,
                next_retry_at: state.next_retry_at,
            }
        };

        state.push_history(RestartHistoryEntry {
            at: now,
            trigger,
            success,
            delay_seconds,
        });

        let log = ContainerRestartLog {
            id: crate::utils::generate_uuid(),
            container_name: name.to_string(),
            attempt,
            trigger,
            reason: match trigger {
                RestartTrigger::Automatic => "unexpected exit".to_string(),
                RestartTrigger::Manual => "manual restart".to_string(),
            },
            delay_seconds,
            success,
            execution: ExecutionSummary::new(
                result.success,
                &result.output,
                result.duration.max(started.elapsed()).as_millis() as u64,
            ),
            health_check,
            created_at: now,
        };
        self.store.record_attempt(state, log).await?;

        Ok(outcome)
    }

    /// Block automatic restarts until `until`
    pub async fn pause(
        &self,
        name: &str,
        until: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<ContainerRestartState, KeeperError> {
        let mut state = self.load_or_new(name).await?;
        let mut fsm = self.fsm(&state);
        state.phase = fsm.process(RestartEvent::Pause).map_err(KeeperError::ValidationError)?;
        state.paused_until = Some(until);
        state.pause_reason = reason;
        self.store.save_restart_state(state.clone()).await?;
        info!(container = %name, "Auto-restart paused until {}", until);
        Ok(state)
    }

    /// Lift a pause early
    pub async fn resume(&self, name: &str) -> Result<ContainerRestartState, KeeperError> {
        let mut state = self.load_existing(name).await?;
        if state.phase != RestartPhase::Paused && state.paused_until.is_none() {
            return Ok(state);
        }
        clear_expired_pause(&mut state);
        self.store.save_restart_state(state.clone()).await?;
        info!(container = %name, phase = ?state.phase, "Auto-restart resumed");
        Ok(state)
    }

    /// Clear the failure streak, backoff, exhaustion and any pause
    pub async fn reset(&self, name: &str) -> Result<ContainerRestartState, KeeperError> {
        let mut state = self.load_existing(name).await?;
        let mut fsm = self.fsm(&state);
        state.phase = fsm.process(RestartEvent::Reset).map_err(KeeperError::ValidationError)?;
        state.consecutive_failures = 0;
        state.current_backoff_seconds = 0.0;
        state.next_retry_at = None;
        state.max_retries_reached = false;
        state.paused_until = None;
        state.pause_reason = None;
        self.store.save_restart_state(state.clone()).await?;
        info!(container = %name, "Restart state reset");
        Ok(state)
    }

    /// Forgive containers that stayed up for their success window.
    ///
    /// Returns the names that were reset.
    pub async fn sweep_success_windows(&self, now: DateTime<Utc>) -> Result<Vec<String>, KeeperError> {
        let mut forgiven = Vec::new();
        for mut state in self.store.list_restart_states().await? {
            let dirty =
                state.consecutive_failures > 0 || state.current_backoff_seconds > 0.0 || state.max_retries_reached;
            if state.phase != RestartPhase::Healthy || !dirty || !state.success_window_elapsed(now) {
                continue;
            }

            let mut fsm = self.fsm(&state);
            if let Err(e) = fsm.forgive() {
                warn!(container = %state.container_name, "Cannot forgive: {}", e);
                continue;
            }
            state.phase = fsm.phase();
            state.consecutive_failures = 0;
            state.current_backoff_seconds = 0.0;
            state.next_retry_at = None;
            state.max_retries_reached = false;
            state.truncate_history();

            info!(container = %state.container_name, "Success window elapsed, failure streak cleared");
            forgiven.push(state.container_name.clone());
            self.store.save_restart_state(state).await?;
        }
        Ok(forgiven)
    }

    fn fsm(&self, state: &ContainerRestartState) -> RestartFsm {
        RestartFsm::restore(
            state.phase,
            state.consecutive_failures,
            state.max_attempts,
            resume_attempt(state),
        )
    }

    /// Schedule the next retry, or mark the container exhausted
    fn after_failure(&self, state: &mut ContainerRestartState, now: DateTime<Utc>) {
        match state.phase {
            RestartPhase::Exhausted => {
                state.max_retries_reached = true;
                state.next_retry_at = None;
                error!(
                    container = %state.container_name,
                    attempts = state.consecutive_failures,
                    "Maximum restart attempts reached, manual reset required"
                );
                self.events.publish(LifecycleEvent::MaxRetriesReached {
                    container_name: state.container_name.clone(),
                    attempts: state.consecutive_failures,
                });
            }
            RestartPhase::Backoff { attempt } => {
                let delay = {
                    let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
                    state.strategy.delay(attempt, &mut *rng)
                };
                state.current_backoff_seconds = delay;
                state.next_retry_at = Some(now + chrono::Duration::milliseconds((delay * 1000.0) as i64));
                info!(container = %state.container_name, attempt, "Next restart in {:.1}s", delay);
            }
            phase => debug!(container = %state.container_name, ?phase, "No retry to schedule"),
        }
    }

    async fn load_existing(&self, name: &str) -> Result<ContainerRestartState, KeeperError> {
        self.store
            .get_restart_state(name)
            .await?
            .ok_or_else(|| KeeperError::NotFound(format!("restart state {}", name)))
    }

    async fn load_or_new(&self, name: &str) -> Result<ContainerRestartState, KeeperError> {
        if let Some(state) = self.store.get_restart_state(name).await? {
            return Ok(state);
        }
        let state = ContainerRestartState::new(
            name,
            self.options.strategy.clone(),
            self.options.max_attempts,
            self.options.success_window_seconds,
        );
        self.store.save_restart_state(state.clone()).await?;
        Ok(state)
    }
}
