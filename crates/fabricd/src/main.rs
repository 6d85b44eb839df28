//! fabricd: network fabric beaconing daemon.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use fabric_core::config::{FabricConfig, ReceiveMode};
use fabric_services::engine::{self, receive_loop};
use fabric_services::{BeaconingEngine, EngineSettings, UdpTransport};

mod inventory;
mod monitor;

use inventory::SystemInterfaces;
use monitor::InterfaceMonitor;

/// How long the interface monitor gets to stop its observers and the engine.
const MONITOR_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = FabricConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = FabricConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        let mut config = FabricConfig::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    });

    let mut allow = config.network.interfaces.clone();
    allow.extend(std::env::args().skip(1));
    tracing::info!(
        port = config.network.port,
        mode = ?config.network.receive_mode,
        interfaces = ?allow,
        "fabricd starting"
    );

    // Beacon socket
    let transport = UdpTransport::bind(&config.network).context("failed to bind beacon socket")?;
    let receiver = match config.network.receive_mode {
        ReceiveMode::Socket => Some(
            transport
                .receiver()
                .context("failed to register beacon socket with tokio")?,
        ),
        ReceiveMode::Observer => None,
    };

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let engine = BeaconingEngine::new(EngineSettings::from(&config), transport);
    let (handle, engine_task) = engine::spawn(engine, shutdown_tx.subscribe());

    let receive_task = tokio::spawn({
        let handle = handle.clone();
        let shutdown = shutdown_tx.subscribe();
        async move {
            match receiver {
                Some(socket) => receive_loop(socket, handle, shutdown).await,
                None => std::future::pending().await,
            }
        }
    });

    let mut monitor_task = tokio::spawn(
        InterfaceMonitor::new(
            SystemInterfaces::new(allow),
            &config,
            handle.clone(),
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    if config.api.enabled {
        let state = fabric_api::ApiState::new(handle.clone(), shutdown_tx.clone());
        let port = config.api.port;
        tokio::spawn(async move {
            if let Err(e) = fabric_api::serve(state, port).await {
                tracing::error!(error = %e, "api server failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    let monitor_done = tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
            tracing::info!("shutting down");
            false
        }
        r = engine_task => {
            tracing::error!("engine task exited: {:?}", r);
            false
        }
        r = receive_task => {
            tracing::error!("receive task exited: {:?}", r);
            false
        }
        r = &mut monitor_task => {
            tracing::error!("interface monitor exited: {:?}", r);
            true
        }
    };

    if !monitor_done {
        let _ = shutdown_tx.send(());
        join_monitor(monitor_task, MONITOR_GRACE).await;
    }

    if handle.stop().await.is_ok() {
        tracing::info!("beaconing engine stopped");
    }

    Ok(())
}

/// Wait up to `grace` for the interface monitor to finish. Returns whether
/// it did.
async fn join_monitor(task: JoinHandle<()>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, task).await {
        Ok(Ok(())) => {
            tracing::info!("interface monitor stopped");
            true
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "interface monitor failed");
            true
        }
        Err(_) => {
            tracing::warn!("interface monitor did not stop in time");
            false
        }
    }
}
