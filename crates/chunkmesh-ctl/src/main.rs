//! chunkmesh-ctl: command-line interface for the tracker and the swarm.

mod cmd;

use std::path::PathBuf;

use anyhow::{Context, Result};

use chunkmesh_core::config::MeshConfig;
use chunkmesh_core::PeerLocation;
use chunkmesh_services::{PeerClient, Swarm, TrackerClient};

use cmd::{files, parse_peer, peers, transfer};

fn print_usage() {
    println!("chunkmesh-ctl: chunkmesh command-line interface");
    println!();
    println!("Usage: chunkmesh-ctl [--tracker <url>] <command>");
    println!();
    println!("Commands:");
    println!("  peers                    List peers registered with the tracker");
    println!("  add-peer <ip> <port>     Register a peer");
    println!("  remove-peer <ip> <port>  Deregister a peer");
    println!("  files                    List published files");
    println!("  publish <path>           Split a file across the swarm and publish it");
    println!("  fetch <file_id> [dir]    Download a published file");
    println!("  ping <ip> <port>         Check that a peer answers");
    println!();
    println!("Options:");
    println!("  --tracker <url>   Tracker base URL (default: from config)");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config = MeshConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeshConfig::default()
    });

    // Parse --tracker option
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--tracker" {
            i += 1;
            config.tracker.url = args.get(i).context("--tracker requires a value")?.clone();
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    let tracker = TrackerClient::from_config(&config.tracker)?;
    // The daemon may have fallen back to another port; prefer what it recorded.
    let me = config
        .storage
        .recorded_local_node()
        .unwrap_or_else(|| PeerLocation::new(config.node.advertise_ip, config.node.listen_port));
    let swarm = || -> Result<Swarm> { Ok(Swarm::from_config(&config)?.with_local(me)) };

    match remaining.as_slice() {
        ["peers"]                           => peers::cmd_peers(&tracker).await,
        ["add-peer", ip, port]              => peers::cmd_add_peer(&tracker, parse_peer(ip, port)?).await,
        ["remove-peer", ip, port]           => peers::cmd_remove_peer(&tracker, parse_peer(ip, port)?).await,
        ["files"]                           => files::cmd_files(&tracker).await,
        ["publish", path]                   => transfer::cmd_publish(&swarm()?, path).await,
        ["fetch", id]                       => {
            transfer::cmd_fetch(&swarm()?, id, &config.storage.download_dir).await
        }
        ["fetch", id, dir]                  => transfer::cmd_fetch(&swarm()?, id, &PathBuf::from(*dir)).await,
        ["ping", ip, port]                  => {
            transfer::cmd_ping(&PeerClient::from_config(&config), parse_peer(ip, port)?).await
        }
        ["help"] | ["--help"] | ["-h"] | [] => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
