//! Chunk retrieval and byte-exact reassembly.
//!
//! Layout while a download is running:
//!   {staging}/{file_hash}.{pid}-{n}/{index}.part   verified chunk bytes
//!   {dest}.partial                                 file being assembled
//!
//! Each `collect` call gets its own staging directory, so concurrent fetches
//! of the same content never touch each other's parts. The destination only
//! appears once the whole-file hash checks out.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use chunkmesh_core::config::MeshConfig;
use chunkmesh_core::hash::StreamHasher;
use chunkmesh_core::{ChunkDescriptor, FileDescriptor};

use crate::client::{FetchReply, PeerClient};
use crate::error::TransferError;
use crate::rotation::rotate;

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectReport {
    pub path: PathBuf,
    pub bytes: u64,
    pub chunks: usize,
}

#[derive(Debug, Clone)]
pub struct Collector {
    client: PeerClient,
    max_concurrency: usize,
    staging_dir: PathBuf,
}

impl Collector {
    pub fn new(client: PeerClient, max_concurrency: usize, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            max_concurrency: max_concurrency.max(1),
            staging_dir: staging_dir.into(),
        }
    }

    pub fn from_config(client: PeerClient, config: &MeshConfig) -> Self {
        Self::new(
            client,
            config.transfer.max_concurrency,
            config.storage.staging_dir.clone(),
        )
    }

    /// Fetch every chunk of `file` and write the reassembled bytes to `dest`.
    pub async fn collect(&self, file: &FileDescriptor, dest: &Path) -> Result<CollectReport, TransferError> {
        file.validate()?;
        if file.encrypted {
            tracing::warn!(name = %file.name, "file is flagged encrypted; delivering bytes as stored");
        }

        let staging = self.staging_path(file);
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| TransferError::io("failed to create staging dir", &staging, e))?;

        let result = self.collect_into(file, &staging, dest).await;
        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            tracing::debug!(path = %staging.display(), error = %e, "staging cleanup failed");
        }
        result
    }

    fn staging_path(&self, file: &FileDescriptor) -> PathBuf {
        let n = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.staging_dir
            .join(format!("{}.{}-{}", file.hash.to_hex(), std::process::id(), n))
    }

    async fn collect_into(
        &self,
        file: &FileDescriptor,
        staging: &Path,
        dest: &Path,
    ) -> Result<CollectReport, TransferError> {
        let chunks = file.sorted_chunks();
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for chunk in &chunks {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let this = self.clone();
            let chunk = (*chunk).clone();
            let part = part_path(staging, chunk.index);
            tasks.spawn(async move {
                let result = this.retrieve(&chunk, &part).await;
                drop(permit);
                (chunk.index, result)
            });
        }

        let mut missing = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(true))) => {}
                Ok((index, Ok(false))) => missing.push(index),
                Ok((_, Err(e))) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => tracing::error!(error = %e, "retrieval task failed"),
            }
        }

        // A task that died without reporting counts as missing.
        for chunk in &chunks {
            if !missing.contains(&chunk.index) && !part_path(staging, chunk.index).is_file() {
                missing.push(chunk.index);
            }
        }
        if !missing.is_empty() {
            missing.sort_unstable();
            tracing::warn!(name = %file.name, missing = ?missing, "download incomplete");
            return Err(TransferError::DownloadIncomplete { missing });
        }

        let bytes = assemble(file, &chunks, staging, dest).await?;
        tracing::info!(name = %file.name, path = %dest.display(), bytes, "file reassembled");
        Ok(CollectReport {
            path: dest.to_path_buf(),
            bytes,
            chunks: chunks.len(),
        })
    }

    /// Try the chunk's holders in listed order. `Ok(false)` if none had it.
    async fn retrieve(&self, chunk: &ChunkDescriptor, part: &Path) -> Result<bool, TransferError> {
        for peer in rotate(&chunk.peers, 0) {
            match self.client.fetch_chunk(*peer, &chunk.hash, chunk.size).await {
                Ok(FetchReply::Found(data)) => {
                    if data.len() as u64 != chunk.size {
                        return Err(TransferError::ChunkSize {
                            index: chunk.index,
                            expected: chunk.size,
                            actual: data.len() as u64,
                        });
                    }
                    tokio::fs::write(part, &data)
                        .await
                        .map_err(|e| TransferError::io("failed to write", part, e))?;
                    tracing::debug!(index = chunk.index, peer = %peer, bytes = data.len(), "chunk retrieved");
                    return Ok(true);
                }
                Ok(FetchReply::NotFound) => {
                    tracing::debug!(index = chunk.index, peer = %peer, "peer does not hold chunk");
                }
                Ok(FetchReply::Corrupt { actual, len }) => {
                    tracing::warn!(
                        index = chunk.index,
                        peer = %peer,
                        expected = %chunk.hash.short(),
                        actual = %actual.short(),
                        len,
                        "chunk failed verification"
                    );
                    return Err(TransferError::ChunkCorrupt {
                        index: chunk.index,
                        peer: peer.to_string(),
                        expected: chunk.hash,
                        actual,
                    });
                }
                Err(e) => {
                    tracing::warn!(index = chunk.index, peer = %peer, error = %e, "chunk fetch failed, rotating");
                }
            }
        }
        tracing::warn!(index = chunk.index, hash = %chunk.hash.short(), "no peer could supply chunk");
        Ok(false)
    }
}

fn part_path(staging: &Path, index: u64) -> PathBuf {
    staging.join(format!("{index}.part"))
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

/// Concatenate parts in index order into `{dest}.partial`, check the whole
/// file hash, then rename into place. Returns bytes written.
async fn assemble(
    file: &FileDescriptor,
    chunks: &[&ChunkDescriptor],
    staging: &Path,
    dest: &Path,
) -> Result<u64, TransferError> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TransferError::io("failed to create", parent, e))?;
    }

    let partial = partial_path(dest);
    let written = write_parts(chunks, staging, &partial).await;
    let (bytes, actual) = match written {
        Ok(done) => done,
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
    };

    if actual != file.hash {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(TransferError::FileCorrupt {
            expected: file.hash,
            actual,
        });
    }

    tokio::fs::rename(&partial, dest)
        .await
        .map_err(|e| TransferError::io("failed to move into place", dest, e))?;
    Ok(bytes)
}

async fn write_parts(
    chunks: &[&ChunkDescriptor],
    staging: &Path,
    partial: &Path,
) -> Result<(u64, chunkmesh_core::ContentHash), TransferError> {
    let mut out = tokio::fs::File::create(partial)
        .await
        .map_err(|e| TransferError::io("failed to create", partial, e))?;
    let mut hasher = StreamHasher::new();
    let mut bytes = 0u64;

    for chunk in chunks {
        let part = part_path(staging, chunk.index);
        let data = tokio::fs::read(&part)
            .await
            .map_err(|e| TransferError::io("failed to read", &part, e))?;
        hasher.update(&data);
        bytes += data.len() as u64;
        out.write_all(&data)
            .await
            .map_err(|e| TransferError::io("failed to write", partial, e))?;
    }
    out.sync_all()
        .await
        .map_err(|e| TransferError::io("failed to sync", partial, e))?;
    Ok((bytes, hasher.finish()))
}
