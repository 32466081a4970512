//! Per-registry request limiting

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Held while a registry request is in flight
#[derive(Debug)]
pub struct RegistryPermit {
    registry: String,
    _permit: Option<OwnedSemaphorePermit>,
}

impl RegistryPermit {
    /// A permit that limits nothing
    pub fn unlimited(registry: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            _permit: None,
        }
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }
}

/// Gate for outbound registry requests
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until a request to `registry` may start
    async fn acquire(&self, registry: &str) -> RegistryPermit;

    /// Return a permit once the request finished
    fn release(&self, permit: RegistryPermit) {
        drop(permit);
    }
}

/// At most `per_registry` concurrent requests to each registry host
pub struct SemaphoreRateLimiter {
    per_registry: usize,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl SemaphoreRateLimiter {
    pub fn new(per_registry: usize) -> Self {
        Self {
            per_registry: per_registry.max(1),
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    fn semaphore(&self, registry: &str) -> Arc<Semaphore> {
        let mut semaphores = self.semaphores.lock().unwrap_or_else(|e| e.into_inner());
        semaphores
            .entry(registry.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_registry)))
            .clone()
    }

    /// Permits currently free for `registry`
    pub fn available(&self, registry: &str) -> usize {
        self.semaphore(registry).available_permits()
    }
}

#[async_trait]
impl RateLimiter for SemaphoreRateLimiter {
    async fn acquire(&self, registry: &str) -> RegistryPermit {
        let semaphore = self.semaphore(registry);
        match semaphore.acquire_owned().await {
            Ok(permit) => {
                debug!(registry, "Registry permit acquired");
                RegistryPermit {
                    registry: registry.to_string(),
                    _permit: Some(permit),
                }
            }
            Err(e) => {
                warn!(registry, "Registry semaphore closed, proceeding unlimited: {}", e);
                RegistryPermit::unlimited(registry)
            }
        }
    }

    fn release(&self, permit: RegistryPermit) {
        debug!(registry = permit.registry(), "Registry permit released");
        drop(permit);
    }
}
