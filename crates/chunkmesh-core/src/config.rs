//! Configuration system for chunkmesh.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CHUNKMESH_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/chunkmesh/config.toml
//!   3. ~/.config/chunkmesh/config.toml

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::manifest::PeerLocation;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub tracker: TrackerConfig,
    pub node: NodeConfig,
    pub network: NetworkConfig,
    pub transfer: TransferConfig,
    pub wire: WireConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Base URL of the tracker, scheme and port included.
    pub url: String,
    /// Per-request timeout.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the peer listener binds.
    pub bind_ip: IpAddr,
    /// Address other peers reach us on; what gets registered with the tracker.
    pub advertise_ip: IpAddr,
    /// Preferred listener port. If taken, the daemon falls back to an OS-assigned one.
    pub listen_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub connect_timeout_ms: u64,
    /// Bound on one whole exchange after connect, on both ends.
    pub io_timeout_ms: u64,
    /// How long a stopping listener waits for in-flight connections.
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes per chunk when splitting a file.
    pub chunk_size: u64,
    /// Worker bound for the listener and for each publish/fetch.
    pub max_concurrency: usize,
    /// Distinct peers each chunk is pushed to. 1 = first accepting peer only.
    pub replication_factor: usize,
    /// Re-hash uploaded bytes and refuse chunks that don't match their claimed hash.
    pub verify_on_receive: bool,
    /// Largest upload a listener accepts.
    pub max_chunk_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    /// Require the `ok` token after an upload. Off = a clean close counts as stored.
    /// With it on, every upload to a peer that never sends the token fails.
    pub require_upload_ack: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Content-addressed chunks this node serves.
    pub chunk_dir: PathBuf,
    /// Completed downloads.
    pub download_dir: PathBuf,
    /// Verified chunk parts of downloads in progress.
    pub staging_dir: PathBuf,
    /// Where a running daemon records the address it actually listens on.
    pub node_file: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

/// 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:33333".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertise_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            listen_port: 5000,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            io_timeout_ms: 30_000,
            drain_timeout_ms: 10_000,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrency: 5,
            replication_factor: 1,
            verify_on_receive: true,
            max_chunk_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            require_upload_ack: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data = data_dir();
        Self {
            chunk_dir: data.join("chunks"),
            download_dir: data.join("downloads").join("complete"),
            staging_dir: data.join("downloads").join("incomplete"),
            node_file: data.join("node.addr"),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl StorageConfig {
    /// Record the location this node is reachable at, for local tools.
    pub fn record_local_node(&self, location: PeerLocation) -> std::io::Result<()> {
        if let Some(parent) = self.node_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.node_file, location.to_string())
    }

    /// The location a running daemon recorded, if any.
    pub fn recorded_local_node(&self) -> Option<PeerLocation> {
        let text = std::fs::read_to_string(&self.node_file).ok()?;
        text.trim().parse::<SocketAddr>().ok().map(PeerLocation::from)
    }

    pub fn clear_local_node(&self) {
        let _ = std::fs::remove_file(&self.node_file);
    }
}

impl TrackerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("chunkmesh")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("chunkmesh")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeshConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MeshConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CHUNKMESH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MeshConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the transfer code cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::Invalid("transfer.chunk_size", "must be > 0".into()));
        }
        if self.transfer.max_concurrency == 0 {
            return Err(ConfigError::Invalid("transfer.max_concurrency", "must be > 0".into()));
        }
        if self.transfer.replication_factor == 0 {
            return Err(ConfigError::Invalid("transfer.replication_factor", "must be > 0".into()));
        }
        if self.transfer.max_chunk_bytes < self.transfer.chunk_size {
            return Err(ConfigError::Invalid(
                "transfer.max_chunk_bytes",
                format!("must be >= chunk_size ({})", self.transfer.chunk_size),
            ));
        }
        Ok(())
    }

    /// Apply CHUNKMESH_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CHUNKMESH_TRACKER__URL") {
            self.tracker.url = v;
        }
        if let Ok(v) = std::env::var("CHUNKMESH_NODE__LISTEN_PORT") {
            if let Ok(p) = v.parse() {
                self.node.listen_port = p;
            }
        }
        if let Ok(v) = std::env::var("CHUNKMESH_NODE__ADVERTISE_IP") {
            if let Ok(ip) = v.parse() {
                self.node.advertise_ip = ip;
            }
        }
        if let Ok(v) = std::env::var("CHUNKMESH_TRANSFER__CHUNK_SIZE") {
            if let Ok(n) = v.parse() {
                self.transfer.chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("CHUNKMESH_TRANSFER__MAX_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.transfer.max_concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("CHUNKMESH_TRANSFER__REPLICATION_FACTOR") {
            if let Ok(n) = v.parse() {
                self.transfer.replication_factor = n;
            }
        }
        if let Ok(v) = std::env::var("CHUNKMESH_STORAGE__CHUNK_DIR") {
            self.storage.chunk_dir = PathBuf::from(v);
        }
    }
}
