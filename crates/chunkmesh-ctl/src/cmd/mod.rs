//! CLI command modules.

pub mod files;
pub mod peers;
pub mod transfer;

use std::net::IpAddr;

use anyhow::{Context, Result};

use chunkmesh_core::PeerLocation;

/// Parse the `IP PORT` pair several commands take.
pub fn parse_peer(ip: &str, port: &str) -> Result<PeerLocation> {
    let ip: IpAddr = ip.parse().with_context(|| format!("invalid IP address: {ip}"))?;
    let port: u16 = port.parse().with_context(|| format!("invalid port: {port}"))?;
    Ok(PeerLocation::new(ip, port))
}
