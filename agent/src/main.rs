//! fleetkeeper - Entry Point
//!
//! Watches a fleet of containers for newer image tags, rolls approved
//! updates out in dependency order and restarts crashed services.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use anyhow::Context;
use fleetkeeper::app::options::AppOptions;
use fleetkeeper::app::run::{check_once, run};
use fleetkeeper::logs::{init_logging, LogOptions};
use fleetkeeper::storage::layout::StorageLayout;
use fleetkeeper::storage::settings::Settings;
use fleetkeeper::utils::version_info;

use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    let layout = match cli_args.get("config") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    if cli_args.contains_key("init-config") {
        return match init_config(&layout).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Failed to write default settings: {:#}", e);
                ExitCode::FAILURE
            }
        };
    }

    // Retrieve the settings file
    let (mut settings, settings_found) = match load_settings(&layout).await {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Unable to read settings file: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    settings.apply_overrides(cli_args.iter());

    // Initialize logging; the guard flushes file output on exit
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };
    if !settings_found {
        warn!(
            "No settings at {}, using defaults",
            layout.settings_file().path().display()
        );
    }

    let options = AppOptions::from_settings(&settings, layout);

    if cli_args.contains_key("check-once") {
        return match check_once(&options).await {
            Ok(job) => {
                match serde_json::to_string_pretty(&job) {
                    Ok(json) => println!("{}", json),
                    Err(e) => error!("Failed to render check job: {}", e),
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Check failed: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    info!("Running fleetkeeper with options: {:?}", options);
    match run(version.version, options, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run fleetkeeper: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Read `settings.json`; a missing file yields the defaults
async fn load_settings(layout: &StorageLayout) -> anyhow::Result<(Settings, bool)> {
    let file = layout.settings_file();
    if !file.exists().await {
        return Ok((Settings::default(), false));
    }
    let settings = file
        .read_json::<Settings>()
        .await
        .with_context(|| format!("reading {}", file.path().display()))?;
    Ok((settings, true))
}

/// Write a default `settings.json` unless one exists
async fn init_config(layout: &StorageLayout) -> anyhow::Result<()> {
    layout
        .setup()
        .await
        .with_context(|| format!("creating {}", layout.base_dir.display()))?;

    let file = layout.settings_file();
    if file.exists().await {
        println!("Settings already exist at {}", file.path().display());
        return Ok(());
    }
    file.write_json(&Settings::default())
        .await
        .with_context(|| format!("writing {}", file.path().display()))?;
    println!("Wrote default settings to {}", file.path().display());
    Ok(())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, shutting down...");
                    }
                    _ = sigint.recv() => {
                        info!("SIGINT received, shutting down...");
                    }
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to install signal handlers, falling back to Ctrl+C: {}", e);
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl+C received, shutting down...");
}
