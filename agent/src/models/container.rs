//! Container models

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// How updates for a container are adopted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePolicy {
    /// Detected updates are approved immediately
    Auto,

    /// Detected updates wait for an operator
    #[default]
    Manual,

    /// The container is never checked
    Disabled,

    /// Security-only adoption, handled like manual
    Security,
}

/// Maximum version increment adopted for a container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateScope {
    Patch,
    #[default]
    Minor,
    Major,
}

/// A managed service container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Unique container (service) name
    pub name: String,

    /// Image repository, e.g. `library/postgres` or `grafana/grafana`
    pub image: String,

    /// Registry host, e.g. `docker.io` or `ghcr.io`
    #[serde(default = "default_registry")]
    pub registry: String,

    /// Tag currently deployed
    pub current_tag: String,

    #[serde(default)]
    pub policy: UpdatePolicy,

    #[serde(default)]
    pub scope: UpdateScope,

    /// Prerelease override; `None` inherits the job-wide default
    #[serde(default)]
    pub include_prereleases: Option<bool>,

    /// Names of containers that must be rolled out before this one
    #[serde(default, deserialize_with = "deserialize_dependencies")]
    pub dependencies: Vec<String>,

    /// Optional maintenance window, e.g. `"sat,sun 02:00-05:00"`
    #[serde(default)]
    pub update_window: Option<String>,
}

fn default_registry() -> String {
    "docker.io".to_string()
}

impl Container {
    /// Create a container with default policy and scope
    pub fn new(name: impl Into<String>, image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            registry: default_registry(),
            current_tag: tag.into(),
            policy: UpdatePolicy::default(),
            scope: UpdateScope::default(),
            include_prereleases: None,
            dependencies: Vec::new(),
            update_window: None,
        }
    }

    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    pub fn with_policy(mut self, policy: UpdatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_scope(mut self, scope: UpdateScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_prereleases(mut self, include: Option<bool>) -> Self {
        self.include_prereleases = include;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Prerelease flag after applying the per-container override
    pub fn effective_include_prereleases(&self, job_default: bool) -> bool {
        self.include_prereleases.unwrap_or(job_default)
    }
}

/// Parse a serialized dependency list.
///
/// Accepts a JSON array (`["db","cache"]`) or a comma separated list
/// (`db, cache`). Anything else yields no dependencies and is logged.
pub fn parse_dependencies(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let names: Vec<String> = if trimmed.starts_with('[') {
        match serde_json::from_str::<Vec<String>>(trimmed) {
            Ok(names) => names,
            Err(e) => {
                warn!("Ignoring unparsable dependency list {:?}: {}", raw, e);
                return Vec::new();
            }
        }
    } else {
        trimmed.split(',').map(|s| s.trim().to_string()).collect()
    };

    if names.iter().any(|n| !is_valid_name(n)) {
        warn!("Ignoring dependency list with invalid names: {:?}", raw);
        return Vec::new();
    }

    dedup_preserving_order(names)
}

/// Container names: ASCII letters, digits, `-`, `_` and `.`
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn dedup_preserving_order(names: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    names.into_iter().filter(|n| seen.insert(n.clone())).collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DependencyField {
    List(Vec<String>),
    Text(String),
}

fn deserialize_dependencies<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let field = Option::<DependencyField>::deserialize(deserializer)?;
    Ok(match field {
        None => Vec::new(),
        Some(DependencyField::List(names)) => dedup_preserving_order(names),
        Some(DependencyField::Text(raw)) => parse_dependencies(&raw),
    })
}
