//! Persisted entity models

pub mod check_job;
pub mod container;
pub mod restart;
pub mod update;
