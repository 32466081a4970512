//! Update decisions

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::container::UpdateScope;
use crate::resolver::{compare_candidates, is_compatible, required_scope, ParsedTag};

/// Outcome for one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateDecision {
    NoUpdate,
    Update { target_tag: String },
}

impl UpdateDecision {
    pub fn target_tag(&self) -> Option<&str> {
        match self {
            UpdateDecision::NoUpdate => None,
            UpdateDecision::Update { target_tag } => Some(target_tag),
        }
    }
}

/// Best candidate for each scope, computed once per check group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDecision {
    pub patch: UpdateDecision,
    pub minor: UpdateDecision,
    pub major: UpdateDecision,
}

impl GroupDecision {
    fn none() -> Self {
        Self {
            patch: UpdateDecision::NoUpdate,
            minor: UpdateDecision::NoUpdate,
            major: UpdateDecision::NoUpdate,
        }
    }

    pub fn for_scope(&self, scope: UpdateScope) -> &UpdateDecision {
        match scope {
            UpdateScope::Patch => &self.patch,
            UpdateScope::Minor => &self.minor,
            UpdateScope::Major => &self.major,
        }
    }
}

/// Decide for every scope in a single pass over `tags`
pub fn decide_group(current_tag: &str, tags: &[String], include_prereleases: bool) -> GroupDecision {
    let Some(current) = ParsedTag::parse(current_tag) else {
        debug!(current_tag, "Current tag is not a version, nothing to compare");
        return GroupDecision::none();
    };

    let mut best: [Option<ParsedTag>; 3] = [None, None, None];
    for tag in tags {
        let Some(candidate) = ParsedTag::parse(tag) else {
            continue;
        };
        if !is_compatible(&current, &candidate, include_prereleases) {
            continue;
        }
        let Some(required) = required_scope(&current, &candidate) else {
            continue;
        };

        for (slot, scope) in best.iter_mut().zip([UpdateScope::Patch, UpdateScope::Minor, UpdateScope::Major]) {
            if required > scope {
                continue;
            }
            let better = match slot {
                None => true,
                Some(held) => compare_candidates(&current, &candidate, held) == Ordering::Less,
            };
            if better {
                *slot = Some(candidate.clone());
            }
        }
    }

    let [patch, minor, major] = best.map(|slot| match slot {
        Some(tag) => UpdateDecision::Update { target_tag: tag.raw },
        None => UpdateDecision::NoUpdate,
    });
    GroupDecision { patch, minor, major }
}

/// Decision for a single scope
pub fn decide(current_tag: &str, tags: &[String], include_prereleases: bool, scope: UpdateScope) -> UpdateDecision {
    decide_group(current_tag, tags, include_prereleases)
        .for_scope(scope)
        .clone()
}
