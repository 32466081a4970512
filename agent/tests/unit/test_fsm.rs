//! Restart FSM unit tests

use fleetkeeper::restart::fsm::{RestartEvent, RestartFsm, RestartPhase};

#[test]
fn test_fsm_initial_state() {
    let fsm = RestartFsm::new(10);
    assert_eq!(fsm.phase(), RestartPhase::Healthy);
    assert_eq!(fsm.consecutive_failures(), 0);
}

#[test]
fn test_fsm_backoff_attempt_follows_streak() {
    let mut fsm = RestartFsm::new(10);

    fsm.process(RestartEvent::UnexpectedExit).unwrap();
    assert_eq!(fsm.phase(), RestartPhase::Backoff { attempt: 0 });

    for expected in 1..4 {
        fsm.process(RestartEvent::DelayElapsed).unwrap();
        fsm.process(RestartEvent::AttemptFailed).unwrap();
        assert_eq!(fsm.phase(), RestartPhase::Backoff { attempt: expected });
    }
    assert_eq!(fsm.consecutive_failures(), 4);
}

#[test]
fn test_fsm_exhausts_at_max_attempts() {
    let mut fsm = RestartFsm::new(3);
    fsm.process(RestartEvent::UnexpectedExit).unwrap();
    for _ in 0..2 {
        fsm.process(RestartEvent::DelayElapsed).unwrap();
        fsm.process(RestartEvent::AttemptFailed).unwrap();
    }
    assert_eq!(fsm.phase(), RestartPhase::Exhausted);
    assert_eq!(fsm.consecutive_failures(), 3);

    // Sticky until reset
    assert!(fsm.process(RestartEvent::DelayElapsed).is_err());
    assert!(fsm.process(RestartEvent::UnexpectedExit).is_err());
    assert_eq!(fsm.process(RestartEvent::Exhaust).unwrap(), RestartPhase::Exhausted);

    fsm.process(RestartEvent::Reset).unwrap();
    assert_eq!(fsm.phase(), RestartPhase::Healthy);
    assert_eq!(fsm.consecutive_failures(), 0);
}

#[test]
fn test_fsm_invalid_transitions() {
    let mut fsm = RestartFsm::new(10);

    // Cannot succeed without attempting
    assert!(fsm.process(RestartEvent::AttemptSucceeded).is_err());
    assert!(fsm.process(RestartEvent::DelayElapsed).is_err());

    fsm.process(RestartEvent::UnexpectedExit).unwrap();
    // Already failing, another exit is not a transition
    assert!(fsm.process(RestartEvent::UnexpectedExit).is_err());
}

#[test]
fn test_fsm_manual_trigger_from_healthy_and_pause() {
    let mut fsm = RestartFsm::new(10);
    assert_eq!(
        fsm.process(RestartEvent::ManualTrigger).unwrap(),
        RestartPhase::Attempting
    );
    fsm.process(RestartEvent::AttemptSucceeded).unwrap();

    fsm.process(RestartEvent::Pause).unwrap();
    assert_eq!(
        fsm.process(RestartEvent::ManualTrigger).unwrap(),
        RestartPhase::Attempting
    );
}

#[test]
fn test_fsm_pause_from_healthy_returns_healthy() {
    let mut fsm = RestartFsm::new(10);
    fsm.process(RestartEvent::Pause).unwrap();
    fsm.process(RestartEvent::PauseExpired).unwrap();
    assert_eq!(fsm.phase(), RestartPhase::Healthy);
}

#[test]
fn test_fsm_restore_and_forgive() {
    let mut fsm = RestartFsm::restore(RestartPhase::Healthy, 4, 10, None);
    assert_eq!(fsm.consecutive_failures(), 4);
    fsm.forgive().unwrap();
    assert_eq!(fsm.consecutive_failures(), 0);

    let mut backing_off = RestartFsm::restore(RestartPhase::Backoff { attempt: 1 }, 2, 10, None);
    assert!(backing_off.forgive().is_err());
}
