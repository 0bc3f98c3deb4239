//! chunkmeshd: serves this node's chunks to the swarm.

use std::time::Duration;

use anyhow::{Context, Result};

use chunkmesh_core::config::MeshConfig;
use chunkmesh_core::PeerLocation;
use chunkmesh_services::dispatch::ServeSettings;
use chunkmesh_services::{ChunkStore, PeerListener, TrackerClient};

fn parse_port(args: &[String]) -> Result<Option<u16>> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            let port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
            return Ok(Some(port));
        }
        i += 1;
    }
    Ok(None)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = MeshConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = MeshConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeshConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Some(port) = parse_port(&args)? {
        config.node.listen_port = port;
    }
    tracing::info!(tracker = %config.tracker.url, "chunkmeshd starting");

    // Chunk store
    let store = ChunkStore::new(&config.storage.chunk_dir)?;
    tracing::info!(
        root = %store.root().display(),
        chunks = store.count(),
        "chunk store ready"
    );

    // Listener
    let socket = PeerListener::bind_with_fallback(config.node.bind_ip, config.node.listen_port)
        .await
        .context("failed to bind peer listener")?;
    let handle = PeerListener::spawn(socket, ServeSettings::from_config(&config), store.clone())?;
    let me = PeerLocation::new(config.node.advertise_ip, handle.local_addr().port());
    if let Err(e) = config.storage.record_local_node(me) {
        tracing::warn!(path = %config.storage.node_file.display(), error = %e, "failed to record node address");
    }

    // Tracker registration
    let tracker = TrackerClient::from_config(&config.tracker)?;
    match tracker.add_peer(me).await {
        Ok(reply) => tracing::info!(peer = %me, message = %reply.message, "registered with tracker"),
        Err(e) => tracing::warn!(peer = %me, error = %e, "tracker registration failed, serving anyway"),
    }

    let stats_printer = {
        let store = store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                tracing::info!(chunks = store.count(), bytes = store.size(), "chunk store stats");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            if let Err(e) = r {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        }
        r = stats_printer => tracing::error!("stats printer exited: {:?}", r),
    }

    if let Err(e) = tracker.remove_peer(me).await {
        tracing::warn!(peer = %me, error = %e, "tracker deregistration failed");
    }
    config.storage.clear_local_node();
    handle.stop().await;
    Ok(())
}
