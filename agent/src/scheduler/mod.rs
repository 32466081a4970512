//! Dependency-ordered rollout scheduling

pub mod dependency;

use thiserror::Error;

pub use dependency::DependencyScheduler;

/// The dependency graph has a cycle.
///
/// `nodes` lists, sorted, every container that never became ready.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Dependency cycle among: {}", nodes.join(", "))]
pub struct CycleError {
    pub nodes: Vec<String>,
}
