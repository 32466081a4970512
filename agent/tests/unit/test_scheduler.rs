//! Dependency scheduler tests

use std::collections::HashMap;
use std::sync::Arc;

use fleetkeeper::cache::order::OrderCache;
use fleetkeeper::scheduler::dependency::DependencyScheduler;

fn graph(edges: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
    edges
        .iter()
        .map(|(n, deps)| (n.to_string(), deps.iter().map(|d| d.to_string()).collect()))
        .collect()
}

fn scheduler() -> DependencyScheduler {
    DependencyScheduler::new(Arc::new(OrderCache::new(16)))
}

#[test]
fn test_dependencies_come_first() {
    let scheduler = scheduler();
    let g = graph(&[("web", &["api"]), ("api", &["db"]), ("db", &[])]);
    assert_eq!(scheduler.order(&g).unwrap(), vec!["db", "api", "web"]);
}

#[test]
fn test_ties_break_alphabetically() {
    let scheduler = scheduler();
    let g = graph(&[("zeta", &[]), ("alpha", &[]), ("mid", &["zeta"])]);
    assert_eq!(scheduler.order(&g).unwrap(), vec!["alpha", "zeta", "mid"]);
}

#[test]
fn test_permuted_input_shares_cache_entry() {
    let scheduler = scheduler();
    let a = graph(&[("api", &["db", "cache"]), ("db", &[]), ("cache", &[])]);
    let b = graph(&[("cache", &[]), ("db", &[]), ("api", &["cache", "db"])]);

    let first = scheduler.order(&a).unwrap();
    let second = scheduler.order(&b).unwrap();
    assert_eq!(first, second);
    assert_eq!(scheduler.cache().len(), 1);

    scheduler.invalidate();
    assert!(scheduler.cache().is_empty());
}

#[test]
fn test_dependency_outside_set_is_ignored() {
    let scheduler = scheduler();
    let g = graph(&[("api", &["vault"]), ("web", &["api"])]);
    assert_eq!(scheduler.order(&g).unwrap(), vec!["api", "web"]);
}

#[test]
fn test_cycle_reported_and_input_fallback() {
    let scheduler = scheduler();
    let g = graph(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]);

    let err = scheduler.order(&g).unwrap_err();
    assert_eq!(err.nodes, vec!["a", "b"]);

    let input = vec!["b".to_string(), "c".to_string(), "a".to_string()];
    assert_eq!(scheduler.order_or_input(&g, &input), input);
    assert!(scheduler.cache().is_empty());
}
