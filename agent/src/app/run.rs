//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::KeeperError;
use crate::models::check_job::CheckJob;
use crate::workers::{checker, restarter, rollout};

/// Run the fleetkeeper daemon
pub async fn run(
    version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), KeeperError> {
    info!(version = %version, "Initializing fleetkeeper...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start fleetkeeper: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    // Shutdown
    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

/// Run a single check job against the inventory and return it
pub async fn check_once(options: &AppOptions) -> Result<CheckJob, KeeperError> {
    let app_state = AppState::init(options).await?;
    let job = app_state.orchestrator.trigger_and_run().await?;
    app_state.shutdown().await?;
    Ok(job)
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, KeeperError> {
    options.layout.setup().await?;

    let app_state = Arc::new(AppState::init(options).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    if options.enable_checker {
        init_checker_worker(
            options.checker_worker.clone(),
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )?;
    }

    if options.enable_restarter {
        init_restarter_worker(
            options.restarter_worker.clone(),
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )?;
    }

    if options.enable_rollout {
        init_rollout_worker(
            options.rollout_worker.clone(),
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )?;
    }

    Ok(app_state)
}

fn init_checker_worker(
    options: checker::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), KeeperError> {
    info!("Initializing checker worker...");

    let orchestrator = app_state.orchestrator.clone();

    let checker_handle = tokio::spawn(async move {
        checker::run(
            &options,
            orchestrator.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_checker_worker_handle(checker_handle)
}

fn init_restarter_worker(
    options: restarter::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), KeeperError> {
    info!("Initializing restarter worker...");

    if app_state.liveness.is_none() {
        info!("No status command configured, exits will not be detected");
    }

    let restarter_handle = tokio::spawn(async move {
        restarter::run(
            &options,
            app_state.restarts.as_ref(),
            app_state.store.as_ref(),
            app_state.liveness.as_deref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_restarter_worker_handle(restarter_handle)
}

fn init_rollout_worker(
    options: rollout::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), KeeperError> {
    info!("Initializing rollout worker...");

    let rollout = app_state.rollout.clone();

    let rollout_handle = tokio::spawn(async move {
        rollout::run(
            &options,
            rollout.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_rollout_worker_handle(rollout_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    checker_worker_handle: Option<JoinHandle<()>>,
    restarter_worker_handle: Option<JoinHandle<()>>,
    rollout_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            checker_worker_handle: None,
            restarter_worker_handle: None,
            rollout_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), KeeperError> {
        if self.app_state.is_some() {
            return Err(KeeperError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_checker_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), KeeperError> {
        if self.checker_worker_handle.is_some() {
            return Err(KeeperError::ShutdownError("checker_handle already set".to_string()));
        }
        self.checker_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_restarter_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), KeeperError> {
        if self.restarter_worker_handle.is_some() {
            return Err(KeeperError::ShutdownError("restarter_handle already set".to_string()));
        }
        self.restarter_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_rollout_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), KeeperError> {
        if self.rollout_worker_handle.is_some() {
            return Err(KeeperError::ShutdownError("rollout_handle already set".to_string()));
        }
        self.rollout_worker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), KeeperError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(self.lifecycle_options.max_shutdown_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), KeeperError> {
        info!("Shutting down fleetkeeper...");

        // 1. Checker worker, after any in-flight job
        if let Some(handle) = self.checker_worker_handle.take() {
            handle.await.map_err(|e| KeeperError::ShutdownError(e.to_string()))?;
        }

        // 2. Rollout worker
        if let Some(handle) = self.rollout_worker_handle.take() {
            handle.await.map_err(|e| KeeperError::ShutdownError(e.to_string()))?;
        }

        // 3. Restarter worker
        if let Some(handle) = self.restarter_worker_handle.take() {
            handle.await.map_err(|e| KeeperError::ShutdownError(e.to_string()))?;
        }

        // 4. App state
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
