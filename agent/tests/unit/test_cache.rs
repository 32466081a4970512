//! Cache unit tests

use std::time::Duration;

use fleetkeeper::cache::order::OrderCache;
use fleetkeeper::cache::tags::TagCache;

fn tags(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

#[test]
fn test_tag_cache_insert_and_get() {
    let cache = TagCache::new(Duration::from_secs(60), 10);
    cache.insert("docker.io", "library/nginx", tags(&["1.25", "1.26"]));

    let entry = cache.get("docker.io", "library/nginx");
    assert!(entry.is_some());
    assert_eq!(entry.unwrap().as_slice(), &["1.25", "1.26"]);

    // Same image on another registry is a different key
    assert!(cache.get("ghcr.io", "library/nginx").is_none());
}

#[test]
fn test_tag_cache_expires() {
    let cache = TagCache::new(Duration::from_millis(20), 10);
    cache.insert("docker.io", "library/redis", tags(&["7.2"]));
    assert!(cache.get("docker.io", "library/redis").is_some());

    std::thread::sleep(Duration::from_millis(40));
    assert!(cache.get("docker.io", "library/redis").is_none());
}

#[test]
fn test_tag_cache_zero_ttl_disables() {
    let cache = TagCache::new(Duration::ZERO, 10);
    assert!(!cache.is_enabled());

    let returned = cache.insert("docker.io", "library/redis", tags(&["7.2"]));
    assert_eq!(returned.len(), 1);
    assert!(cache.get("docker.io", "library/redis").is_none());
    assert!(cache.is_empty());
}

#[test]
fn test_tag_cache_eviction() {
    let cache = TagCache::new(Duration::from_secs(60), 2);
    cache.insert("docker.io", "a", tags(&["1"]));
    cache.insert("docker.io", "b", tags(&["1"]));
    cache.insert("docker.io", "c", tags(&["1"]));

    // Cache should have evicted the oldest entry
    assert_eq!(cache.len(), 2);
    assert!(cache.get("docker.io", "a").is_none());
    assert!(cache.get("docker.io", "c").is_some());
}

#[test]
fn test_tag_cache_remove() {
    let cache = TagCache::new(Duration::from_secs(60), 10);
    cache.insert("docker.io", "a", tags(&["1"]));
    cache.remove("docker.io", "a");
    assert!(cache.get("docker.io", "a").is_none());
}

#[test]
fn test_order_cache_eviction_and_invalidate() {
    let cache = OrderCache::new(2);
    cache.insert("k1".to_string(), tags(&["db", "api"]));
    cache.insert("k2".to_string(), tags(&["db"]));
    cache.insert("k3".to_string(), tags(&["api"]));

    assert_eq!(cache.len(), 2);
    assert!(cache.get("k1").is_none());
    assert_eq!(cache.get("k3"), Some(tags(&["api"])));

    cache.invalidate();
    assert!(cache.is_empty());
}
