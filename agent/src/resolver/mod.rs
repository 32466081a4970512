//! Tag and version resolution

pub mod version;

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::cache::tags::TagCache;
use crate::models::container::UpdateScope;
use crate::registry::limiter::RateLimiter;
use crate::registry::{RegistryError, TagSource};

pub use version::{is_prerelease_tag, Arch, OsFamily, ParsedTag};

/// Whether `candidate` may replace `current` at all, ignoring scope.
///
/// Architecture only disqualifies when both tags carry one and they differ.
/// Prereleases pass only when `include_prereleases` is set.
pub fn is_compatible(current: &ParsedTag, candidate: &ParsedTag, include_prereleases: bool) -> bool {
    if candidate.prerelease && !include_prereleases {
        return false;
    }
    if let (Some(a), Some(b)) = (current.arch, candidate.arch) {
        if a != b {
            return false;
        }
    }
    current.os == candidate.os && current.variant == candidate.variant
}

/// Narrowest scope that admits `candidate`, `None` unless strictly newer
pub fn required_scope(current: &ParsedTag, candidate: &ParsedTag) -> Option<UpdateScope> {
    if candidate.version <= current.version {
        return None;
    }
    let (cur, cand) = (&current.version, &candidate.version);
    Some(if cand.major == cur.major && cand.minor == cur.minor {
        UpdateScope::Patch
    } else if cand.major == cur.major {
        UpdateScope::Minor
    } else {
        UpdateScope::Major
    })
}

/// Strictly newer and within `scope`
pub fn within_scope(current: &ParsedTag, candidate: &ParsedTag, scope: UpdateScope) -> bool {
    required_scope(current, candidate).is_some_and(|required| required <= scope)
}

/// Order two candidates: higher version first, then the tag shaped like
/// `current` (same `v` prefix), then lexical order.
pub fn compare_candidates(current: &ParsedTag, a: &ParsedTag, b: &ParsedTag) -> Ordering {
    b.version
        .cmp(&a.version)
        .then_with(|| {
            let a_shape = a.v_prefix == current.v_prefix;
            let b_shape = b.v_prefix == current.v_prefix;
            b_shape.cmp(&a_shape)
        })
        .then_with(|| a.raw.cmp(&b.raw))
}

/// Fetches tag lists through the cache and the registry rate limiter
pub struct TagResolver {
    source: Arc<dyn TagSource>,
    limiter: Arc<dyn RateLimiter>,
    cache: Arc<TagCache>,
}

impl TagResolver {
    pub fn new(source: Arc<dyn TagSource>, limiter: Arc<dyn RateLimiter>, cache: Arc<TagCache>) -> Self {
        Self {
            source,
            limiter,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<TagCache> {
        &self.cache
    }

    /// Tags for `(registry, image)`; a cache miss always fetches
    pub async fn fetch_tags(&self, registry: &str, image: &str) -> Result<Arc<Vec<String>>, RegistryError> {
        if let Some(tags) = self.cache.get(registry, image) {
            debug!(registry, image, "Tag cache hit");
            return Ok(tags);
        }

        let permit = self.limiter.acquire(registry).await;
        let result = self.source.list_tags(registry, image).await;
        self.limiter.release(permit);

        let tags = result?;
        Ok(self.cache.insert(registry, image, tags))
    }
}
