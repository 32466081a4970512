//! Background workers

pub mod checker;
pub mod restarter;
pub mod rollout;
