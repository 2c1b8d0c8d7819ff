//! Lavaclient Monitor - keeps a client connected to a set of audio instances.
//!
//! Loads the instance list, bootstraps the client and logs everything the
//! instances and sessions report until it is asked to stop.

mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lavaclient_core::{bootstrap_client, InstanceEvent, LavaClient, LavaEvent, PlayerEvent};
use tokio::signal;
use tokio::sync::broadcast;

use crate::config::MonitorConfig;

/// Lavaclient Monitor - headless instance and session monitor.
#[derive(Parser, Debug)]
#[command(name = "lavaclient-monitor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE", env = "LAVACLIENT_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "LAVACLIENT_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bot user id (overrides config file).
    #[arg(short, long, env = "LAVACLIENT_USER_ID")]
    user_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Lavaclient Monitor v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        MonitorConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(user_id) = args.user_id {
        config.user_id = user_id;
    }

    log::info!(
        "Configuration: {} instance(s), resume_timeout={}s, report_interval={}s",
        config.instances.len(),
        config.resume_timeout_secs,
        config.report_interval_secs
    );

    let client =
        bootstrap_client(config.to_client_config()).context("Failed to bootstrap client")?;

    let events_handle = tokio::spawn(log_events(client.subscribe()));

    let report_interval = Duration::from_secs(config.report_interval_secs);
    tokio::select! {
        _ = shutdown_signal() => {},
        _ = report_loop(&client, report_interval) => {},
    }

    log::info!("Shutdown signal received, cleaning up...");

    client.shutdown().await;
    events_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Logs every event until the client goes away.
async fn log_events(mut events: broadcast::Receiver<LavaEvent>) {
    loop {
        match events.recv().await {
            Ok(LavaEvent::Instance(event)) => log_instance_event(&event),
            Ok(LavaEvent::Player(event)) => log_player_event(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("[Monitor] Skipped {} event(s)", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn log_instance_event(event: &InstanceEvent) {
    match event {
        InstanceEvent::Connected { instance, .. } => {
            log::info!("[Monitor] {} connected", instance);
        }
        InstanceEvent::Ready {
            instance, resumed, ..
        } => log::info!("[Monitor] {} ready (resumed: {})", instance, resumed),
        InstanceEvent::Disconnected {
            instance,
            code,
            reason,
            ..
        } => log::warn!(
            "[Monitor] {} disconnected (code {:?}): {}",
            instance,
            code,
            reason
        ),
        InstanceEvent::Lost { instance, .. } => {
            log::warn!("[Monitor] {} lost its sessions", instance);
        }
        InstanceEvent::AuthenticationFailed {
            instance, status, ..
        } => log::error!(
            "[Monitor] {} rejected the credential (HTTP {})",
            instance,
            status
        ),
        InstanceEvent::GaveUp {
            instance, attempts, ..
        } => log::error!(
            "[Monitor] {} unreachable after {} attempt(s)",
            instance,
            attempts
        ),
        InstanceEvent::Stats {
            instance,
            stats,
            penalty,
            ..
        } => log::debug!(
            "[Monitor] {} stats: {} player(s), {} playing, penalty {:.2}",
            instance,
            stats.players,
            stats.playing_players,
            penalty
        ),
        InstanceEvent::Removed { instance, .. } => {
            log::info!("[Monitor] {} removed", instance);
        }
    }
}

fn log_player_event(event: &PlayerEvent) {
    match event {
        PlayerEvent::PlayerUpdate { .. } => log::trace!("[Monitor] {:?}", event),
        PlayerEvent::TrackException { .. }
        | PlayerEvent::TrackStuck { .. }
        | PlayerEvent::RequestDropped { .. }
        | PlayerEvent::PlayerError { .. } => {
            log::warn!("[Monitor] {}: {:?}", event.guild_id(), event);
        }
        _ => log::info!("[Monitor] {}: {:?}", event.guild_id(), event),
    }
}

/// Periodically logs one line per instance. Never returns when disabled.
async fn report_loop(client: &LavaClient, period: Duration) {
    if period.is_zero() {
        return std::future::pending().await;
    }
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        for instance in client.instances().all() {
            let players = instance
                .stats()
                .map(|stats| stats.snapshot.players.to_string())
                .unwrap_or_else(|| "-".to_string());
            log::info!(
                "[Monitor] {} state={:?} players={} penalty={:.2} sessions={}",
                instance.id(),
                instance.state(),
                players,
                instance.penalty(),
                client.sessions().sessions_on(instance.id()).len()
            );
        }
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
