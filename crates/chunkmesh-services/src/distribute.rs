//! Chunk distribution: split a file and place every chunk on the swarm.
//!
//! The file is read sequentially in `chunk_size` windows. Each window is
//! hashed and handed to a placement task while the next one is read. A
//! permit is taken before every read, so at most `max_concurrency` windows
//! are buffered or in flight at once.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use chunkmesh_core::config::MeshConfig;
use chunkmesh_core::hash::StreamHasher;
use chunkmesh_core::{ChunkDescriptor, ContentHash, FileDescriptor, PeerLocation};

use crate::client::PeerClient;
use crate::error::TransferError;
use crate::rotation::{random_start, rotate};

/// Outcome of one distribution run.
#[derive(Debug, Clone)]
pub struct DistributionReport {
    /// Placed chunks, sorted by index.
    pub chunks: Vec<ChunkDescriptor>,
    /// Indices no peer accepted, ascending.
    pub failed: Vec<u64>,
    pub total: u64,
    pub file_hash: ContentHash,
    pub file_size: u64,
}

impl DistributionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Manifest for the tracker. Refused unless every chunk was placed.
    pub fn into_descriptor(self, name: impl Into<String>) -> Result<FileDescriptor, TransferError> {
        if !self.is_complete() {
            return Err(TransferError::UploadIncomplete {
                failed: self.failed,
                total: self.total,
            });
        }
        Ok(FileDescriptor {
            id: None,
            name: name.into(),
            hash: self.file_hash,
            size: self.file_size,
            encrypted: false,
            chunks: self.chunks,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Distributor {
    client: PeerClient,
    chunk_size: u64,
    max_concurrency: usize,
    replication_factor: usize,
}

impl Distributor {
    pub fn new(client: PeerClient, chunk_size: u64, max_concurrency: usize, replication_factor: usize) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
            max_concurrency: max_concurrency.max(1),
            replication_factor: replication_factor.max(1),
        }
    }

    pub fn from_config(client: PeerClient, config: &MeshConfig) -> Self {
        Self::new(
            client,
            config.transfer.chunk_size,
            config.transfer.max_concurrency,
            config.transfer.replication_factor,
        )
    }

    /// Split `path` into chunks and push each to `peers`.
    ///
    /// Never fails because of peers: chunks nobody accepted are listed in
    /// `failed`. Errors are reserved for the local file.
    pub async fn distribute(&self, path: &Path, peers: &[PeerLocation]) -> Result<DistributionReport, TransferError> {
        if peers.is_empty() {
            return Err(TransferError::NoPeers);
        }
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| TransferError::io("failed to open", path, e))?;

        let peers: Arc<[PeerLocation]> = peers.into();
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut hasher = StreamHasher::new();
        let mut file_size = 0u64;
        let mut total = 0u64;

        loop {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let window = read_window(&mut file, self.chunk_size)
                .await
                .map_err(|e| TransferError::io("failed to read", path, e))?;
            if window.is_empty() {
                break;
            }

            hasher.update(&window);
            file_size += window.len() as u64;
            let index = total;
            total += 1;

            let this = self.clone();
            let peers = peers.clone();
            tasks.spawn(async move {
                let hash = ContentHash::of(&window);
                let size = window.len() as u64;
                let placed = this.place(index, &hash, Bytes::from(window), &peers).await;
                drop(permit);
                ChunkDescriptor {
                    id: None,
                    index,
                    hash,
                    size,
                    peers: placed,
                }
            });
        }

        let mut chunks = Vec::with_capacity(total as usize);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(chunk) if !chunk.peers.is_empty() => chunks.push(chunk),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "placement task failed"),
            }
        }
        chunks.sort_by_key(|c| c.index);

        let placed: BTreeSet<u64> = chunks.iter().map(|c| c.index).collect();
        let failed: Vec<u64> = (0..total).filter(|i| !placed.contains(i)).collect();

        let report = DistributionReport {
            chunks,
            failed,
            total,
            file_hash: hasher.finish(),
            file_size,
        };
        tracing::info!(
            path = %path.display(),
            chunks = report.total,
            failed = report.failed.len(),
            bytes = report.file_size,
            "distribution finished"
        );
        Ok(report)
    }

    /// Push one chunk around the rotation until `replication_factor` peers
    /// hold it or every peer has been tried once. Returns the holders.
    pub async fn place(
        &self,
        index: u64,
        hash: &ContentHash,
        data: Bytes,
        peers: &[PeerLocation],
    ) -> Vec<PeerLocation> {
        let mut placed = Vec::with_capacity(self.replication_factor);
        for peer in rotate(peers, random_start(peers.len())) {
            match self.client.push_chunk(*peer, hash, &data).await {
                Ok(()) => {
                    placed.push(*peer);
                    if placed.len() >= self.replication_factor {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(index, peer = %peer, error = %e, "chunk push failed, rotating");
                }
            }
        }
        if placed.is_empty() {
            tracing::warn!(index, hash = %hash.short(), "no peer accepted chunk");
        } else if placed.len() < self.replication_factor {
            tracing::debug!(
                index,
                holders = placed.len(),
                wanted = self.replication_factor,
                "chunk under-replicated"
            );
        }
        placed
    }
}

/// Read up to `size` bytes. Shorter only at end of file.
async fn read_window(file: &mut tokio::fs::File, size: u64) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(size as usize);
    file.take(size).read_to_end(&mut buf).await?;
    Ok(buf)
}
