//! Grouping containers that resolve identically

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::container::Container;

/// Containers sharing this key share one tag fetch and one decision
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageCheckKey {
    pub registry: String,
    pub image: String,
    pub current_tag: String,
    pub include_prereleases: bool,
}

impl ImageCheckKey {
    pub fn for_container(container: &Container, default_include_prereleases: bool) -> Self {
        Self {
            registry: container.registry.clone(),
            image: container.image.clone(),
            current_tag: container.current_tag.clone(),
            include_prereleases: container.effective_include_prereleases(default_include_prereleases),
        }
    }
}

impl std::fmt::Display for ImageCheckKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.image, self.current_tag)?;
        if self.include_prereleases {
            write!(f, " (+pre)")?;
        }
        Ok(())
    }
}

/// One unit of work for a check worker
#[derive(Debug, Clone)]
pub struct CheckGroup {
    pub key: ImageCheckKey,

    /// Sorted by name
    pub containers: Vec<Container>,
}

/// Group containers by [`ImageCheckKey`].
///
/// Groups come out in key order. With `dedup` off every container forms its
/// own group.
pub fn group_containers(containers: Vec<Container>, default_include_prereleases: bool, dedup: bool) -> Vec<CheckGroup> {
    let mut groups: BTreeMap<ImageCheckKey, Vec<Container>> = BTreeMap::new();
    let mut singles: Vec<CheckGroup> = Vec::new();

    for container in containers {
        let key = ImageCheckKey::for_container(&container, default_include_prereleases);
        if dedup {
            groups.entry(key).or_default().push(container);
        } else {
            singles.push(CheckGroup {
                key,
                containers: vec![container],
            });
        }
    }

    if !dedup {
        singles.sort_by(|a, b| {
            a.key
                .cmp(&b.key)
                .then_with(|| a.containers[0].name.cmp(&b.containers[0].name))
        });
        return singles;
    }

    groups
        .into_iter()
        .map(|(key, mut containers)| {
            containers.sort_by(|a, b| a.name.cmp(&b.name));
            CheckGroup { key, containers }
        })
        .collect()
}
