//! parley-tracker — Parley tracker daemon.

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use parley_core::config::ParleyConfig;
use parley_services::TrackerState;
use parley_tracker::{bind, local_client, snapshot_loop, TrackerServer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = ParleyConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = ParleyConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ParleyConfig::default()
    });

    if let Some(port) = std::env::args().nth(1) {
        config.tracker.port = port
            .parse()
            .with_context(|| format!("invalid port argument: {port}"))?;
    }

    let listener = bind(&config.tracker).await?;
    let tracker_addr = listener.local_addr()?;
    let state = TrackerState::shared();

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let server_task = tokio::spawn(
        TrackerServer::new(
            listener,
            state.clone(),
            &config.tracker,
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    if config.tracker.snapshot_interval_secs > 0 {
        let every = std::time::Duration::from_secs(config.tracker.snapshot_interval_secs);
        tokio::spawn(snapshot_loop(state.clone(), every));
    }

    if config.api.enabled {
        let api = config.api.clone();
        let client = local_client(tracker_addr, api.tracker_timeout());
        tokio::spawn(async move {
            let state = parley_api::ApiState::new(client);
            if let Err(e) = parley_api::serve(state, &api.bind_addr, api.port).await {
                tracing::error!(error = %e, "HTTP bridge failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = server_task        => tracing::error!("tracker server exited: {:?}", r),
    }

    Ok(())
}
