//! Publish, fetch and ping.

use std::path::Path;

use anyhow::{Context, Result};

use chunkmesh_core::PeerLocation;
use chunkmesh_services::{PeerClient, Swarm};

pub async fn cmd_publish(swarm: &Swarm, path: &str) -> Result<()> {
    let outcome = swarm
        .publish(Path::new(path))
        .await
        .with_context(|| format!("failed to publish {path}"))?;

    let desc = &outcome.descriptor;
    println!("File published.");
    println!("  File ID : {}", outcome.receipt.file_id);
    println!("  Name    : {}", desc.name);
    println!("  Size    : {} bytes", desc.size);
    println!("  Chunks  : {}", desc.chunks.len());
    println!("  Hash    : {}", desc.hash);
    if !outcome.receipt.message.is_empty() {
        println!("  Tracker : {}", outcome.receipt.message);
    }
    Ok(())
}

pub async fn cmd_fetch(swarm: &Swarm, file_id: &str, dir: &Path) -> Result<()> {
    let file_id: u64 = file_id
        .parse()
        .with_context(|| format!("invalid file id: {file_id}"))?;
    let report = swarm
        .fetch(file_id, dir)
        .await
        .with_context(|| format!("failed to fetch file {file_id}"))?;

    println!("File fetched.");
    println!("  Path   : {}", report.path.display());
    println!("  Size   : {} bytes", report.bytes);
    println!("  Chunks : {}", report.chunks);
    Ok(())
}

pub async fn cmd_ping(client: &PeerClient, peer: PeerLocation) -> Result<()> {
    let started = std::time::Instant::now();
    client.ping(peer).await?;
    println!("pong from {} in {:.1} ms", peer, started.elapsed().as_secs_f64() * 1000.0);
    Ok(())
}
