//! File and chunk descriptors, the placement manifest exchanged with the tracker.
//!
//! Field names on the JSON wire are fixed by the tracker API
//! (`file_name`, `chunk_index`, `peer_ip`, ...); the Rust names are not.

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

// ── Peers ────────────────────────────────────────────────────────────────────

/// Where a peer listens. The (ip, port) pair is the only peer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerLocation {
    #[serde(rename = "peer_ip")]
    pub ip: IpAddr,
    #[serde(rename = "peer_port")]
    pub port: u16,
}

impl PeerLocation {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl From<SocketAddr> for PeerLocation {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for PeerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.socket_addr().fmt(f)
    }
}

// ── Descriptors ──────────────────────────────────────────────────────────────

/// One chunk of a file and the peers that hold it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// Tracker-assigned row id. Absent on publish.
    #[serde(rename = "chunk_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// 0-based position. Byte offset is `index * chunk_size`.
    #[serde(rename = "chunk_index")]
    pub index: u64,

    /// SHA-256 of exactly this chunk's bytes.
    #[serde(rename = "chunk_hash")]
    pub hash: ContentHash,

    #[serde(rename = "chunk_size")]
    pub size: u64,

    /// Placements: peers that accepted this chunk.
    #[serde(rename = "chunk_peers", default)]
    pub peers: Vec<PeerLocation>,
}

/// A published file: metadata plus its chunk placements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Tracker-assigned id. Absent on publish.
    #[serde(rename = "file_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    #[serde(rename = "file_name")]
    pub name: String,

    /// SHA-256 of the whole file.
    #[serde(rename = "file_hash")]
    pub hash: ContentHash,

    #[serde(rename = "file_size")]
    pub size: u64,

    /// Informational only. No cipher is applied to chunk bytes.
    #[serde(rename = "file_enc", default)]
    pub encrypted: bool,

    #[serde(rename = "file_chunks", default)]
    pub chunks: Vec<ChunkDescriptor>,
}

impl FileDescriptor {
    /// Sum of all chunk sizes.
    pub fn chunk_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.size).sum()
    }

    /// Chunks ordered by index. List order from the tracker carries no meaning.
    pub fn sorted_chunks(&self) -> Vec<&ChunkDescriptor> {
        let mut chunks: Vec<&ChunkDescriptor> = self.chunks.iter().collect();
        chunks.sort_by_key(|c| c.index);
        chunks
    }

    /// Check the structural invariants a reassembly depends on:
    /// indices are exactly `0..n` with no duplicates, no chunk is empty,
    /// and chunk sizes add up to the file size.
    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut seen = BTreeSet::new();
        for chunk in &self.chunks {
            if !seen.insert(chunk.index) {
                return Err(ManifestError::DuplicateIndex(chunk.index));
            }
            if chunk.size == 0 {
                return Err(ManifestError::EmptyChunk(chunk.index));
            }
        }
        let n = self.chunks.len() as u64;
        if let Some(missing) = (0..n).find(|i| !seen.contains(i)) {
            return Err(ManifestError::MissingIndex(missing));
        }
        let total = self.chunk_bytes();
        if total != self.size {
            return Err(ManifestError::SizeMismatch {
                declared: self.size,
                chunks: total,
            });
        }
        Ok(())
    }
}

/// Row of the tracker's file listing. The hash is kept as text since the
/// listing is display-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub file_id: u64,
    pub file_name: String,
    pub file_hash: String,
    pub file_size: u64,
    #[serde(default)]
    pub file_enc: bool,
}

/// Tracker reply to a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub file_id: u64,
    pub file_name: String,
    pub file_hash: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    #[error("chunk index {0} appears more than once")]
    DuplicateIndex(u64),

    #[error("chunk index {0} is missing")]
    MissingIndex(u64),

    #[error("chunk {0} has zero size")]
    EmptyChunk(u64),

    #[error("file size {declared} does not match chunk total {chunks}")]
    SizeMismatch { declared: u64, chunks: u64 },
}

// ── Layout ───────────────────────────────────────────────────────────────────

/// Number of chunks a file of `size` bytes splits into: `ceil(size / chunk_size)`.
pub fn chunk_count(size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    size.div_ceil(chunk_size)
}

/// Length of chunk `index`. Every chunk but the last is `chunk_size`;
/// the last is `size - chunk_size * (count - 1)`. Out-of-range → 0.
pub fn chunk_len(size: u64, chunk_size: u64, index: u64) -> u64 {
    let count = chunk_count(size, chunk_size);
    if index >= count {
        0
    } else if index + 1 < count {
        chunk_size
    } else {
        size - chunk_size * (count - 1)
    }
}
