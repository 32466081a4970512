//! Restart supervision tests

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_test::assert_ok;

use fleetkeeper::deploy::{HealthProbe, LivenessProbe};
use fleetkeeper::errors::KeeperError;
use fleetkeeper::models::container::Container;
use fleetkeeper::models::restart::RestartTrigger;
use fleetkeeper::restart::backoff::BackoffStrategy;
use fleetkeeper::restart::breaker::BlockReason;
use fleetkeeper::restart::controller::{AttemptOutcome, RestartController, RestartOptions};
use fleetkeeper::restart::fsm::RestartPhase;
use fleetkeeper::storage::memory::MemoryStore;
use fleetkeeper::workers::restarter::{pass, Options, PassReport};

use crate::support::{store_with, CollectingSink, FakeExecutor, FakeLiveness, FakeProbe};

fn options(max_attempts: u32) -> RestartOptions {
    RestartOptions {
        strategy: BackoffStrategy::Fixed { delay: 10.0 },
        max_attempts,
        startup_delay: Duration::ZERO,
        ..Default::default()
    }
}

struct Harness {
    executor: Arc<FakeExecutor>,
    events: Arc<CollectingSink>,
    controller: RestartController,
}

fn harness(options: RestartOptions, probe: Option<Arc<FakeProbe>>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let executor = Arc::new(FakeExecutor::new());
    let events = Arc::new(CollectingSink::new());
    let controller = RestartController::new(
        store,
        executor.clone(),
        probe.map(|p| p as Arc<dyn HealthProbe>),
        events.clone(),
        options,
    );
    Harness {
        executor,
        events,
        controller,
    }
}

#[tokio::test]
async fn test_breaker_blocks_at_max_attempts_until_reset() {
    let h = harness(options(3), None);
    h.executor.fail("web");

    assert_ok!(h.controller.record_exit("web", Utc::now()).await);
    let first = assert_ok!(h.controller.attempt("web", RestartTrigger::Automatic).await);
    assert!(matches!(first, AttemptOutcome::Failed { attempt: 1, next_retry_at: Some(_) }));

    let second = assert_ok!(h.controller.attempt("web", RestartTrigger::Automatic).await);
    assert_eq!(
        second,
        AttemptOutcome::Failed {
            attempt: 2,
            next_retry_at: None
        }
    );

    let state = h.controller.state("web").await.unwrap().unwrap();
    assert_eq!(state.phase, RestartPhase::Exhausted);
    assert!(state.max_retries_reached);
    assert_eq!(h.events.count("max_retries_reached"), 1);

    // Both triggers are refused while exhausted
    let blocked = assert_ok!(h.controller.attempt("web", RestartTrigger::Automatic).await);
    assert_eq!(blocked, AttemptOutcome::Blocked(BlockReason::MaxAttempts { max: 3 }));
    let manual = assert_ok!(h.controller.attempt("web", RestartTrigger::Manual).await);
    assert_eq!(manual, AttemptOutcome::Blocked(BlockReason::MaxAttempts { max: 3 }));
    assert_eq!(h.executor.intents().len(), 2);

    h.executor.recover("web");
    let reset = assert_ok!(h.controller.reset("web").await);
    assert_eq!(reset.phase, RestartPhase::Healthy);
    assert!(!reset.max_retries_reached);

    let after = assert_ok!(h.controller.attempt("web", RestartTrigger::Manual).await);
    assert_eq!(after, AttemptOutcome::Succeeded { attempt: 1 });
}

#[tokio::test]
async fn test_breaker_at_default_limit_holds_until_reset() {
    let h = harness(options(10), None);
    h.executor.fail("web");

    assert_ok!(h.controller.record_exit("web", Utc::now()).await);
    for _ in 0..9 {
        assert_ok!(h.controller.attempt("web", RestartTrigger::Automatic).await);
    }
    let state = h.controller.state("web").await.unwrap().unwrap();
    assert_eq!(state.consecutive_failures, 10);
    assert_eq!(state.phase, RestartPhase::Exhausted);

    for trigger in [RestartTrigger::Automatic, RestartTrigger::Manual, RestartTrigger::Automatic] {
        match assert_ok!(h.controller.attempt("web", trigger).await) {
            AttemptOutcome::Blocked(reason) => {
                assert_eq!(reason, BlockReason::MaxAttempts { max: 10 });
                assert!(reason.to_string().contains("maximum retry attempts"));
            }
            other => panic!("expected the breaker to block, got {other:?}"),
        }
    }
    assert_eq!(h.executor.intents().len(), 9);

    let reset = assert_ok!(h.controller.reset("web").await);
    assert_eq!(reset.consecutive_failures, 0);
    h.executor.recover("web");
    let after = assert_ok!(h.controller.attempt("web", RestartTrigger::Manual).await);
    assert_eq!(after, AttemptOutcome::Succeeded { attempt: 1 });
}

#[tokio::test]
async fn test_crash_after_successful_restart_backs_off_again() {
    let h = harness(options(3), None);
    h.executor.fail("web");

    assert_ok!(h.controller.record_exit("web", Utc::now()).await);
    let failed = assert_ok!(h.controller.attempt("web", RestartTrigger::Automatic).await);
    assert!(matches!(failed, AttemptOutcome::Failed { attempt: 1, .. }));

    h.executor.recover("web");
    let recovered = assert_ok!(h.controller.attempt("web", RestartTrigger::Automatic).await);
    assert_eq!(recovered, AttemptOutcome::Succeeded { attempt: 2 });
    let state = h.controller.state("web").await.unwrap().unwrap();
    assert_eq!(state.phase, RestartPhase::Healthy);
    assert_eq!(state.consecutive_failures, 0);

    let crashed = assert_ok!(h.controller.record_exit("web", Utc::now()).await);
    assert_eq!(crashed.phase, RestartPhase::Backoff { attempt: 0 });
    assert_eq!(crashed.consecutive_failures, 1);
    assert!(!crashed.max_retries_reached);
    assert_eq!(h.events.count("max_retries_reached"), 0);
}

#[tokio::test]
async fn test_concurrency_cap_counts_other_containers() {
    let h = harness(
        RestartOptions {
            max_concurrent: 1,
            ..options(5)
        },
        None,
    );
    let now = Utc::now();
    assert_ok!(h.controller.record_exit("a", now).await);
    assert_ok!(h.controller.record_exit("b", now).await);

    let a = assert_ok!(h.controller.attempt("a", RestartTrigger::Automatic).await);
    assert!(matches!(a, AttemptOutcome::Succeeded { .. }));

    let b = assert_ok!(h.controller.attempt("b", RestartTrigger::Automatic).await);
    assert_eq!(
        b,
        AttemptOutcome::Blocked(BlockReason::ConcurrencyLimit { active: 1, cap: 1 })
    );

    // Manual restarts skip the cap
    let manual = assert_ok!(h.controller.attempt("b", RestartTrigger::Manual).await);
    assert!(matches!(manual, AttemptOutcome::Succeeded { .. }));
}

#[tokio::test]
async fn test_failed_health_probe_counts_as_failure() {
    let probe = Arc::new(FakeProbe::new(false));
    let h = harness(options(5), Some(probe.clone()));

    assert_ok!(h.controller.record_exit("api", Utc::now()).await);
    let outcome = assert_ok!(h.controller.attempt("api", RestartTrigger::Automatic).await);
    assert!(matches!(outcome, AttemptOutcome::Failed { attempt: 1, .. }));

    let logs = assert_ok!(h.controller.logs("api").await);
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert!(!log.success);
    assert!(log.execution.success);
    assert_eq!(log.reason, "unexpected exit");
    let check = log.health_check.as_ref().expect("probe ran");
    assert!(!check.healthy);

    let state = h.controller.state("api").await.unwrap().unwrap();
    assert_eq!(state.consecutive_failures, 2);
    assert_eq!(state.phase, RestartPhase::Backoff { attempt: 1 });
    assert_eq!(h.events.count("restart_failed"), 1);

    probe.set_healthy(true);
    let outcome = assert_ok!(h.controller.attempt("api", RestartTrigger::Automatic).await);
    assert_eq!(outcome, AttemptOutcome::Succeeded { attempt: 2 });
}

#[tokio::test]
async fn test_success_window_boundary() {
    let h = harness(options(5), None);
    assert_ok!(h.controller.record_exit("db", Utc::now()).await);
    assert_ok!(h.controller.attempt("db", RestartTrigger::Automatic).await);

    let state = h.controller.state("db").await.unwrap().unwrap();
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(state.current_backoff_seconds, 10.0);
    let started = state.last_successful_start.expect("restart succeeded");

    let early = assert_ok!(
        h.controller
            .sweep_success_windows(started + chrono::Duration::seconds(299))
            .await
    );
    assert!(early.is_empty());

    let on_time = assert_ok!(
        h.controller
            .sweep_success_windows(started + chrono::Duration::seconds(300))
            .await
    );
    assert_eq!(on_time, vec!["db"]);

    let state = h.controller.state("db").await.unwrap().unwrap();
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(state.current_backoff_seconds, 0.0);
}

#[tokio::test]
async fn test_first_delay_stays_inside_jitter_band() {
    let strategy = BackoffStrategy::Exponential {
        base_delay: 10.0,
        max_delay: 3600.0,
        multiplier: 1.0,
        jitter: true,
    };
    for seed in 0..20 {
        let store = Arc::new(MemoryStore::new());
        let controller = RestartController::new(
            store,
            Arc::new(FakeExecutor::new()),
            None,
            Arc::new(CollectingSink::new()),
            RestartOptions {
                strategy: strategy.clone(),
                ..options(5)
            },
        )
        .with_seed(seed);

        let state = assert_ok!(controller.record_exit("web", Utc::now()).await);
        let delay = state.current_backoff_seconds;
        assert!((10.0..=12.0).contains(&delay), "seed {seed}: delay {delay}");
    }
}

#[tokio::test]
async fn test_pause_blocks_every_trigger_until_resumed() {
    let h = harness(options(5), None);
    assert_ok!(h.controller.record_exit("web", Utc::now()).await);

    let until = Utc::now() + chrono::Duration::hours(1);
    let paused = assert_ok!(h.controller.pause("web", until, Some("maintenance".to_string())).await);
    assert_eq!(paused.phase, RestartPhase::Paused);

    let blocked = assert_ok!(h.controller.attempt("web", RestartTrigger::Automatic).await);
    assert_eq!(blocked, AttemptOutcome::Blocked(BlockReason::Paused { until }));

    let manual = assert_ok!(h.controller.attempt("web", RestartTrigger::Manual).await);
    assert_eq!(manual, AttemptOutcome::Blocked(BlockReason::Paused { until }));
    assert!(h.executor.intents().is_empty());

    assert_ok!(h.controller.resume("web").await);
    let manual = assert_ok!(h.controller.attempt("web", RestartTrigger::Manual).await);
    assert!(matches!(manual, AttemptOutcome::Succeeded { .. }));
    let state = h.controller.state("web").await.unwrap().unwrap();
    assert!(state.paused_until.is_none());
}

#[tokio::test]
async fn test_reset_unknown_container() {
    let h = harness(options(5), None);
    let err = h.controller.reset("ghost").await.unwrap_err();
    assert!(matches!(err, KeeperError::NotFound(_)));
}

#[tokio::test]
async fn test_supervision_pass() {
    let store = store_with(vec![
        Container::new("web", "org/web", "1.0.0"),
        Container::new("db", "library/postgres", "16.1"),
    ])
    .await;
    let executor = Arc::new(FakeExecutor::new());
    let controller = RestartController::new(
        store.clone(),
        executor.clone(),
        None,
        Arc::new(CollectingSink::new()),
        options(5),
    );
    let liveness = FakeLiveness::new();
    let probe: &dyn LivenessProbe = &liveness;
    let worker = Options {
        interval: Duration::from_secs(10),
        probe_concurrency: 2,
    };

    liveness.set_exited("web", true);
    let now = Utc::now();
    let report = assert_ok!(pass(&worker, &controller, store.as_ref(), Some(probe), now).await);
    assert_eq!(
        report,
        PassReport {
            exits_recorded: 1,
            ..Default::default()
        }
    );

    // Still down and now due; the repeated exit is not counted again
    let later = now + chrono::Duration::seconds(11);
    let report = assert_ok!(pass(&worker, &controller, store.as_ref(), Some(probe), later).await);
    assert_eq!(report.exits_recorded, 0);
    assert_eq!(report.attempted, 1);
    assert_eq!(executor.containers(), vec!["web"]);

    liveness.set_exited("web", false);
    let report = assert_ok!(pass(&worker, &controller, store.as_ref(), Some(probe), later).await);
    assert_eq!(report, PassReport::default());
}
