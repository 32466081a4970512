//! Restart supervision: backoff, circuit breaker and the controller

pub mod backoff;
pub mod breaker;
pub mod controller;
pub mod fsm;
