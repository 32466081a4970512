//! Integration tests, compiled as a single test binary

mod support;

mod test_cache;
mod test_fsm;
mod test_orchestrator;
mod test_restart;
mod test_rollout;
mod test_scheduler;
