//! fleetkeeper library
//!
//! Update checking, dependency-ordered rollout and restart supervision for
//! container fleets.

pub mod app;
pub mod cache;
pub mod check;
pub mod decision;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod registry;
pub mod resolver;
pub mod restart;
pub mod rollout;
pub mod scheduler;
pub mod storage;
pub mod utils;
pub mod workers;
