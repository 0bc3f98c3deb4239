//! Content-addressed chunk store.
//!
//! Chunks are stored flat under the store root, one file per chunk, named
//! by the lowercase hex SHA-256 of its bytes:
//!   {root}/{hash}
//!
//! Writes land in a temp file and are renamed into place, so a reader never
//! sees half a chunk. A second write of the same hash replaces the first;
//! content addressing means the bytes are the same.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use chunkmesh_core::hash::StreamHasher;
use chunkmesh_core::ContentHash;

const TMP_SUFFIX: &str = ".tmp";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Outcome of streaming an upload into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Persisted under the claimed hash.
    Stored { bytes: u64 },
    /// Bytes hashed to something else and verification was on. Nothing kept.
    Mismatch { actual: ContentHash, bytes: u64 },
    /// Sender exceeded the byte limit. Nothing kept.
    TooLarge { limit: u64 },
}

/// Content-addressed chunk store.
#[derive(Clone, Debug)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Open a store rooted at the given directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create chunk store: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has(&self, hash: &ContentHash) -> bool {
        self.chunk_path(hash).is_file()
    }

    /// Open a chunk for streaming. `None` if this node does not hold it.
    pub async fn open(&self, hash: &ContentHash) -> Result<Option<tokio::fs::File>> {
        let path = self.chunk_path(hash);
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to open chunk: {}", path.display())),
        }
    }

    /// Read a whole chunk into memory.
    pub async fn get(&self, hash: &ContentHash) -> Result<Option<Bytes>> {
        let Some(mut file) = self.open(hash).await? else {
            return Ok(None);
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .await
            .with_context(|| format!("failed to read chunk {}", hash.short()))?;
        Ok(Some(Bytes::from(data)))
    }

    /// Store a chunk that is already in memory.
    pub async fn put(&self, hash: &ContentHash, data: &[u8]) -> Result<()> {
        let tmp_path = self.temp_path(hash);
        let written = async {
            let mut file = tokio::fs::File::create(&tmp_path)
                .await
                .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;
            file.write_all(data).await.context("failed to write chunk data")?;
            file.sync_all().await.context("failed to sync chunk to disk")?;
            Ok::<_, anyhow::Error>(())
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }
        self.commit(&tmp_path, hash).await
    }

    /// Stream a chunk from `reader` until EOF.
    ///
    /// Bytes are hashed as they arrive. With `verify` set, a chunk whose
    /// bytes do not hash to `claimed` is discarded; without it the mismatch
    /// is logged and the chunk is kept under `claimed` anyway.
    pub async fn receive<R>(
        &self,
        claimed: &ContentHash,
        reader: &mut R,
        limit: u64,
        verify: bool,
    ) -> Result<Received>
    where
        R: AsyncRead + Unpin,
    {
        let tmp_path = self.temp_path(claimed);
        let streamed = Self::stream_to(&tmp_path, reader, limit).await;

        let (bytes, actual) = match streamed {
            Ok(Some(done)) => done,
            Ok(None) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Ok(Received::TooLarge { limit });
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e);
            }
        };

        if actual != *claimed {
            if verify {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Ok(Received::Mismatch { actual, bytes });
            }
            tracing::warn!(
                claimed = %claimed,
                actual = %actual,
                "storing chunk whose bytes do not match its name"
            );
        }

        self.commit(&tmp_path, claimed).await?;
        Ok(Received::Stored { bytes })
    }

    /// Copy `reader` into a fresh file at `path`. `None` if `limit` was exceeded.
    async fn stream_to<R>(path: &Path, reader: &mut R, limit: u64) -> Result<Option<(u64, ContentHash)>>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("failed to create temp file: {}", path.display()))?;
        let mut hasher = StreamHasher::new();
        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0u64;

        loop {
            let n = reader.read(&mut buf).await.context("chunk stream read failed")?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if total > limit {
                return Ok(None);
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await.context("failed to write chunk data")?;
        }

        file.sync_all().await.context("failed to sync chunk to disk")?;
        Ok(Some((total, hasher.finish())))
    }

    async fn commit(&self, tmp_path: &Path, hash: &ContentHash) -> Result<()> {
        let path = self.chunk_path(hash);
        tokio::fs::rename(tmp_path, &path).await.with_context(|| {
            format!("failed to rename {} to {}", tmp_path.display(), path.display())
        })?;
        tracing::trace!(hash = %hash, "chunk stored");
        Ok(())
    }

    fn chunk_path(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(hash.to_hex())
    }

    /// Unique per writer, so concurrent receives of one hash never share a temp file.
    fn temp_path(&self, hash: &ContentHash) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!("{}.{}-{}{}", hash.to_hex(), std::process::id(), n, TMP_SUFFIX))
    }

    fn chunk_entries(&self) -> impl Iterator<Item = fs::DirEntry> {
        fs::read_dir(&self.root)
            .into_iter()
            .flatten()
            .flatten()
            .filter(|e| !e.file_name().to_string_lossy().ends_with(TMP_SUFFIX))
    }

    /// Number of chunks held (for stats/debugging).
    pub fn count(&self) -> usize {
        self.chunk_entries().count()
    }

    /// Total bytes held (for stats/debugging).
    pub fn size(&self) -> u64 {
        self.chunk_entries()
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }
}
