//! Topological ordering of containers by dependency

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::order::OrderCache;
use crate::scheduler::CycleError;
use crate::utils::sha256_hash;

/// Orders containers so dependencies come first.
///
/// Kahn's algorithm over the input set only; dependencies outside the set
/// are ignored. Among ready containers the alphabetically first is emitted.
pub struct DependencyScheduler {
    cache: Arc<OrderCache>,
}

impl DependencyScheduler {
    pub fn new(cache: Arc<OrderCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<OrderCache> {
        &self.cache
    }

    /// Forget cached orders, after a dependency list changed
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    /// Order the keys of `dependencies`
    pub fn order(&self, dependencies: &HashMap<String, Vec<String>>) -> Result<Vec<String>, CycleError> {
        let graph = restrict(dependencies);
        let key = cache_key(&graph);

        if let Some(order) = self.cache.get(&key) {
            debug!(nodes = order.len(), "Rollout order cache hit");
            return Ok(order);
        }

        let order = kahn(&graph)?;
        self.cache.insert(key, order.clone());
        Ok(order)
    }

    /// Like [`order`](Self::order), falling back to `input_order` on a cycle
    pub fn order_or_input(
        &self,
        dependencies: &HashMap<String, Vec<String>>,
        input_order: &[String],
    ) -> Vec<String> {
        match self.order(dependencies) {
            Ok(order) => order,
            Err(e) => {
                warn!("{}, applying in input order", e);
                input_order.to_vec()
            }
        }
    }
}

/// Canonical graph: sorted nodes with their sorted in-set dependencies
fn restrict(dependencies: &HashMap<String, Vec<String>>) -> BTreeMap<&str, BTreeSet<&str>> {
    dependencies
        .iter()
        .map(|(node, deps)| {
            let in_set = deps
                .iter()
                .map(String::as_str)
                .filter(|dep| dependencies.contains_key(*dep))
                .collect();
            (node.as_str(), in_set)
        })
        .collect()
}

fn cache_key(graph: &BTreeMap<&str, BTreeSet<&str>>) -> String {
    let mut canonical = String::new();
    for (node, deps) in graph {
        canonical.push_str(node);
        canonical.push(':');
        let deps: Vec<&str> = deps.iter().copied().collect();
        canonical.push_str(&deps.join(","));
        canonical.push('\n');
    }
    sha256_hash(canonical.as_bytes())
}

fn kahn(graph: &BTreeMap<&str, BTreeSet<&str>>) -> Result<Vec<String>, CycleError> {
    let mut in_degree: BTreeMap<&str, usize> = graph.iter().map(|(n, deps)| (*n, deps.len())).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (node, deps) in graph {
        for dep in deps {
            dependents.entry(*dep).or_default().push(*node);
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| *node)
        .collect();

    let mut order = Vec::with_capacity(graph.len());
    while let Some(node) = ready.pop_first() {
        order.push(node.to_string());
        for dependent in dependents.get(node).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if order.len() < graph.len() {
        let nodes = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(node, _)| node.to_string())
            .collect();
        return Err(CycleError { nodes });
    }
    Ok(order)
}
