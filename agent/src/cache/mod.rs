//! In-memory caches

pub mod order;
pub mod tags;
