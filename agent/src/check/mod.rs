//! Update checking across the fleet

pub mod grouping;
pub mod orchestrator;
pub mod record;

pub use grouping::{group_containers, CheckGroup, ImageCheckKey};
pub use orchestrator::{CheckOptions, CheckOrchestrator};
