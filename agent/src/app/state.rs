//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::cache::order::OrderCache;
use crate::cache::tags::TagCache;
use crate::check::CheckOrchestrator;
use crate::deploy::command::CommandExecutor;
use crate::deploy::{HealthProbe, LivenessProbe};
use crate::errors::KeeperError;
use crate::events::{BroadcastSink, EventSink, LogNotifier, NotifyingSink};
use crate::filesys::file::File;
use crate::registry::client::RegistryClient;
use crate::registry::limiter::SemaphoreRateLimiter;
use crate::resolver::TagResolver;
use crate::restart::controller::RestartController;
use crate::rollout::Rollout;
use crate::scheduler::DependencyScheduler;
use crate::storage::inventory::{load_inventory, save_inventory};
use crate::storage::memory::MemoryStore;
use crate::storage::traits::Store;

/// Buffered events per broadcast subscriber
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Main application state
pub struct AppState {
    /// Backing store, seeded from the inventory file
    pub store: Arc<MemoryStore>,

    /// Inventory file, rewritten on shutdown
    pub inventory_file: Arc<File>,

    /// Lifecycle event fan-out
    pub events: Arc<BroadcastSink>,

    pub orchestrator: Arc<CheckOrchestrator>,
    pub scheduler: Arc<DependencyScheduler>,
    pub rollout: Arc<Rollout>,
    pub restarts: Arc<RestartController>,

    /// Present when a status command is configured
    pub liveness: Option<Arc<dyn LivenessProbe>>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, KeeperError> {
        info!("Initializing application state...");

        let store = Arc::new(MemoryStore::new());
        let inventory_file = Arc::new(options.layout.inventory_file());
        load_inventory(&inventory_file, store.as_ref()).await?;
        let shared_store: Arc<dyn Store> = store.clone();

        let events = Arc::new(BroadcastSink::new(EVENT_CHANNEL_CAPACITY));
        let sink: Arc<dyn EventSink> = Arc::new(NotifyingSink::new(
            events.clone(),
            options.notifications,
            Arc::new(LogNotifier),
        ));

        let resolver = Arc::new(TagResolver::new(
            Arc::new(RegistryClient::new(options.registry.clone())?),
            Arc::new(SemaphoreRateLimiter::new(options.registry_concurrency)),
            Arc::new(TagCache::new(options.caches.tags_ttl, options.caches.tags_capacity)),
        ));
        let orchestrator = Arc::new(CheckOrchestrator::new(
            shared_store.clone(),
            resolver,
            sink.clone(),
            options.check.clone(),
        ));

        let executor = Arc::new(CommandExecutor::new(options.commands.clone(), options.command_timeout));
        let scheduler = Arc::new(DependencyScheduler::new(Arc::new(OrderCache::new(
            options.caches.orders_capacity,
        ))));
        let rollout = Arc::new(Rollout::new(
            shared_store.clone(),
            scheduler.clone(),
            executor.clone(),
            sink.clone(),
            options.rollout.clone(),
        ));

        let health: Option<Arc<dyn HealthProbe>> = match options.commands.health {
            Some(_) => Some(executor.clone()),
            None => None,
        };
        let restarts = Arc::new(RestartController::new(
            shared_store,
            executor.clone(),
            health,
            sink,
            options.restart.clone(),
        ));
        let liveness: Option<Arc<dyn LivenessProbe>> = match options.commands.status {
            Some(_) => Some(executor),
            None => None,
        };

        Ok(Self {
            store,
            inventory_file,
            events,
            orchestrator,
            scheduler,
            rollout,
            restarts,
            liveness,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), KeeperError> {
        info!("Shutting down application state...");
        // Rollouts move current tags; persist them
        save_inventory(&self.inventory_file, self.store.as_ref()).await
    }
}
