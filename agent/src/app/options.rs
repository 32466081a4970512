//! Application configuration options

use std::time::Duration;

use crate::check::CheckOptions;
use crate::deploy::command::CommandTemplates;
use crate::events::NotificationPolicy;
use crate::registry::client::RegistryOptions;
use crate::restart::controller::RestartOptions;
use crate::rollout::RolloutOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{Settings, SettingsProvider};
use crate::workers::{checker, restarter, rollout};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Cache configuration
    pub caches: CacheOptions,

    /// Enable the periodic update checker
    pub enable_checker: bool,

    /// Enable restart supervision
    pub enable_restarter: bool,

    /// Enable the rollout worker
    pub enable_rollout: bool,

    pub check: CheckOptions,
    pub registry: RegistryOptions,

    /// Concurrent tag fetches per registry host
    pub registry_concurrency: usize,

    pub restart: RestartOptions,
    pub rollout: RolloutOptions,
    pub notifications: NotificationPolicy,

    /// Shell templates for apply, restart and probes
    pub commands: CommandTemplates,
    pub command_timeout: Duration,

    pub checker_worker: checker::Options,
    pub restarter_worker: restarter::Options,
    pub rollout_worker: rollout::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::default(),
            caches: CacheOptions::default(),
            enable_checker: true,
            enable_restarter: true,
            enable_rollout: true,
            check: CheckOptions::default(),
            registry: RegistryOptions::default(),
            registry_concurrency: 2,
            restart: RestartOptions::default(),
            rollout: RolloutOptions::default(),
            notifications: NotificationPolicy::default(),
            commands: CommandTemplates::default(),
            command_timeout: Duration::from_secs(300),
            checker_worker: checker::Options::default(),
            restarter_worker: restarter::Options::default(),
            rollout_worker: rollout::Options::default(),
        }
    }
}

impl AppOptions {
    /// Resolve every option from the settings file
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let defaults = Self::default();
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(
                    settings
                        .get_int(
                            "lifecycle.max_shutdown_delay_seconds",
                            defaults.lifecycle.max_shutdown_delay.as_secs() as i64,
                        )
                        .max(1) as u64,
                ),
            },
            layout,
            caches: CacheOptions::from_settings(settings),
            enable_checker: settings.enable_checker,
            enable_restarter: settings.enable_restarter,
            enable_rollout: settings.enable_rollout,
            check: CheckOptions::from_settings(settings),
            registry: RegistryOptions::from_settings(settings),
            registry_concurrency: settings
                .get_int("registry.concurrency_per_registry", defaults.registry_concurrency as i64)
                .max(1) as usize,
            restart: RestartOptions::from_settings(settings),
            rollout: RolloutOptions::from_settings(settings),
            notifications: NotificationPolicy::from_settings(settings),
            commands: CommandTemplates::from_settings(settings),
            command_timeout: Duration::from_secs(
                settings
                    .get_int("exec.timeout_seconds", defaults.command_timeout.as_secs() as i64)
                    .max(1) as u64,
            ),
            checker_worker: checker::Options::from_settings(settings),
            restarter_worker: restarter::Options::from_settings(settings),
            rollout_worker: rollout::Options::from_settings(settings),
        }
    }
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    /// Tag list lifetime; zero disables the tag cache
    pub tags_ttl: Duration,

    /// Maximum tag cache entries
    pub tags_capacity: usize,

    /// Maximum cached rollout orders
    pub orders_capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            tags_ttl: Duration::from_secs(900),
            tags_capacity: 512,
            orders_capacity: 128,
        }
    }
}

impl CacheOptions {
    pub fn from_settings(settings: &dyn SettingsProvider) -> Self {
        let defaults = Self::default();
        Self {
            tags_ttl: Duration::from_secs(
                settings
                    .get_int("tags.cache_ttl_seconds", defaults.tags_ttl.as_secs() as i64)
                    .max(0) as u64,
            ),
            tags_capacity: settings
                .get_int("tags.cache_capacity", defaults.tags_capacity as i64)
                .max(1) as usize,
            orders_capacity: settings
                .get_int("scheduler.cache_capacity", defaults.orders_capacity as i64)
                .max(1) as usize,
        }
    }
}
