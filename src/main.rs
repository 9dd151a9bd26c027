//! FleetLink agent
//!
//! Keeps the device connected to its fleet controller. Sending SIGHUP
//! reloads the configuration file and applies controller setting changes.

mod agent;

use agent::{EventQueue, LocalUsers, LoggingHandlers};
use anyhow::{Context, Result};
use clap::Parser;
use fleetlink_client::{
    Collaborators, ConfigWatcher, ControllerConfigSource, ControllerLink, SharedControllerConfig,
    WatchOutcome,
};
use fleetlink_core::config::{AppConfig, LogFormat, LoggingConfig};
use fleetlink_core::types::{ControllerConfig, LiveEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// FleetLink - NVR controller integration agent
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/fleetlink.yaml")]
    config: PathBuf,

    /// Override controller endpoint (host:port)
    #[arg(long, env = "FLEETLINK_CONTROLLER")]
    controller: Option<String>,

    /// Override log level
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = AppConfig::from_config_builder(&args.config)
        .with_context(|| format!("Failed to load config file: {:?}", args.config))?;

    if let Some(endpoint) = &args.controller {
        config.controller = parse_endpoint(endpoint)?;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn parse_endpoint(endpoint: &str) -> Result<ControllerConfig> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .with_context(|| format!("Expected host:port, got {}", endpoint))?;
    let port = port
        .parse()
        .with_context(|| format!("Invalid controller port: {}", port))?;
    Ok(ControllerConfig::new(host, port))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn reload(path: &Path, shared: &SharedControllerConfig, watcher: &ConfigWatcher) {
    let config = match AppConfig::from_config_builder(path).and_then(|c| {
        c.validate()?;
        Ok(c)
    }) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Config reload failed, keeping current settings");
            return;
        }
    };

    let old = shared.controller();
    if old == config.controller {
        info!("Controller settings unchanged");
        return;
    }

    if watcher.is_handling() {
        warn!("Previous config change still in progress, ignoring reload");
        return;
    }
    shared.replace(config.controller.clone());
    match watcher.notify(&old, &config.controller) {
        WatchOutcome::Scheduled(_) => info!("Applying controller settings"),
        WatchOutcome::Busy => warn!("Config change already in progress"),
        WatchOutcome::Unchanged => {}
    }
}

#[cfg(unix)]
async fn run_until_shutdown(
    path: &Path,
    shared: &SharedControllerConfig,
    watcher: &ConfigWatcher,
) -> Result<()> {
    let mut hangup = signal::unix::signal(signal::unix::SignalKind::hangup())
        .context("Failed to install SIGHUP handler")?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("Received SIGHUP, reloading configuration");
                reload(path, shared, watcher);
            }
            result = signal::ctrl_c() => {
                result.context("Failed to listen for shutdown signal")?;
                info!("Received shutdown signal, stopping agent...");
                return Ok(());
            }
        }
    }
}

#[cfg(not(unix))]
async fn run_until_shutdown(_: &Path, _: &SharedControllerConfig, _: &ConfigWatcher) -> Result<()> {
    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal, stopping agent...");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config.logging);

    info!("Starting FleetLink agent");
    info!("Configuration loaded from {:?}", args.config);

    let shared = SharedControllerConfig::new(config.controller.clone());
    let events = Arc::new(EventQueue::default());
    let collaborators = Collaborators::new(
        Arc::new(LoggingHandlers),
        Arc::new(LocalUsers),
        events.clone(),
    );
    let link = Arc::new(ControllerLink::new(
        config.link.settings(),
        Arc::new(shared.clone()),
        collaborators,
    ));
    let watcher = ConfigWatcher::new(link.clone());

    if config.controller.enabled {
        info!("Controller: {}", config.controller.endpoint());
        link.start()?;
        events.push(LiveEvent::new("system", "fleetlink-agent", "agent started"));
    } else {
        info!("Controller integration disabled, waiting for a config reload");
    }

    run_until_shutdown(&args.config, &shared, &watcher).await?;

    if let Err(e) = link.stop_and_wait().await {
        error!(error = %e, "Controller link did not shut down cleanly");
    }
    info!(status = %link.status(), "FleetLink agent stopped");

    Ok(())
}
