//! RelayBot - Discord channel relay
//!
//! Links channels across Discord servers into relay groups and mirrors every
//! message, edit and delete posted in one member channel into all the others.
//! Warnings and errors from the bot itself can be relayed into log channels.

mod common;
mod config;
mod discord;
mod relay;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use common::messages::RelayInput;
use config::{env::get_config_path, load_and_validate};
use discord::DiscordRelay;
use relay::{
    run_retention_sweep, ChannelRegistry, CorrelationStore, Dispatcher, LogRelayLayer,
    RelaySender, SharedRegistry,
};

/// How long each task gets to finish after shutdown is signalled.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Every input, chat or log, goes through one dispatcher channel
    let (input_tx, input_rx) = mpsc::unbounded_channel::<RelayInput>();

    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer())
        .with(LogRelayLayer::new(input_tx.clone()))
        .init();

    info!("RelayBot v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    info!("Configuration loaded successfully");
    info!("  Relay groups: {}", config.relay.groups.len());
    info!(
        "  Log relay: {}",
        if config.log_relay.enabled {
            config.log_relay.min_level.as_str()
        } else {
            "disabled"
        }
    );

    let registry: SharedRegistry = Arc::new(ChannelRegistry::from_config(&config));
    let store = CorrelationStore::new();

    // Resolve who we are before the gateway delivers anything
    let discord = DiscordRelay::new(config.discord.token.clone(), input_tx);
    let relay_identity = discord.relay_identity().await.map_err(|e| {
        error!("Failed to authenticate with Discord: {}", e);
        e
    })?;

    let sender: Arc<dyn RelaySender> = Arc::new(discord.sender());
    let dispatcher = Arc::new(Dispatcher::from_config(
        &config,
        registry,
        sender,
        relay_identity,
        Arc::clone(&store),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher_task = tokio::spawn(dispatcher.run(input_rx, shutdown_rx.clone()));
    let sweep_task = tokio::spawn(run_retention_sweep(
        store,
        config.correlation.retention(),
        config.correlation.sweep_interval(),
        shutdown_rx.clone(),
    ));
    let mut discord_task = tokio::spawn(discord.run(shutdown_rx));

    let discord_finished = tokio::select! {
        biased;
        _ = shutdown_signal() => {
            info!("Shutdown signal received - stopping relay...");
            false
        }
        result = &mut discord_task => {
            if let Err(e) = result {
                error!("Discord task panicked: {}", e);
            } else {
                warn!("Discord task ended - stopping relay");
            }
            true
        }
    };

    if let Err(e) = shutdown_tx.send(true) {
        debug!("Shutdown channel closed (all tasks already exited): {}", e);
    }

    if !discord_finished {
        await_task("Discord client", discord_task).await;
    }
    await_task("Dispatcher", dispatcher_task).await;
    await_task("Correlation sweep", sweep_task).await;

    info!("Exiting...");
    Ok(())
}

async fn await_task(name: &str, task: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
        Ok(Ok(())) => info!("{} stopped", name),
        Ok(Err(e)) => warn!("{} task panicked: {}", name, e),
        Err(_) => warn!("{} shutdown timed out", name),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
