//! Tracker peer list commands.

use anyhow::Result;

use chunkmesh_core::PeerLocation;
use chunkmesh_services::TrackerClient;

pub async fn cmd_peers(tracker: &TrackerClient) -> Result<()> {
    let peers = tracker.peers().await?;

    if peers.is_empty() {
        println!("No peers registered.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Registered Peers ({})", peers.len());
    println!("═══════════════════════════════════════");
    for p in &peers {
        println!("  {}", p);
    }

    Ok(())
}

pub async fn cmd_add_peer(tracker: &TrackerClient, peer: PeerLocation) -> Result<()> {
    let reply = tracker.add_peer(peer).await?;
    println!("{}", if reply.message.is_empty() { format!("Peer {peer} added.") } else { reply.message });
    Ok(())
}

pub async fn cmd_remove_peer(tracker: &TrackerClient, peer: PeerLocation) -> Result<()> {
    let reply = tracker.remove_peer(peer).await?;
    println!("{}", if reply.message.is_empty() { format!("Peer {peer} removed.") } else { reply.message });
    Ok(())
}
