//! Serves one inbound connection: read the op code, run its handler, close.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use zerocopy::FromZeroes;

use chunkmesh_core::config::MeshConfig;
use chunkmesh_core::wire::{Op, RequestHeader, WireError, NOT_FOUND, PONG, STORED};
use chunkmesh_core::ContentHash;

use crate::store::{ChunkStore, Received};

/// Knobs for the serving side of a node.
#[derive(Debug, Clone)]
pub struct ServeSettings {
    /// Bound on one whole connection, header to close.
    pub io_timeout: Duration,
    pub verify_on_receive: bool,
    pub max_chunk_bytes: u64,
    /// Connections served at once.
    pub max_concurrency: usize,
    pub drain_timeout: Duration,
}

impl ServeSettings {
    pub fn from_config(config: &MeshConfig) -> Self {
        Self {
            io_timeout: config.network.io_timeout(),
            verify_on_receive: config.transfer.verify_on_receive,
            max_chunk_bytes: config.transfer.max_chunk_bytes,
            max_concurrency: config.transfer.max_concurrency,
            drain_timeout: config.network.drain_timeout(),
        }
    }
}

/// Why a connection was dropped without a normal reply.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("protocol violation: {0}")]
    Wire(#[from] WireError),

    #[error("socket: {0}")]
    Io(#[from] io::Error),

    #[error("store: {0:#}")]
    Store(anyhow::Error),

    #[error("upload rejected: {0}")]
    Rejected(String),
}

pub struct Dispatcher {
    store: ChunkStore,
    settings: ServeSettings,
}

impl Dispatcher {
    pub fn new(store: ChunkStore, settings: ServeSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &ServeSettings {
        &self.settings
    }

    /// Serve `stream` to completion. Errors end here; the socket is closed
    /// on return either way.
    pub async fn serve(&self, mut stream: TcpStream, peer: SocketAddr) {
        match tokio::time::timeout(self.settings.io_timeout, self.handle(&mut stream, peer)).await {
            Ok(Ok(())) => {}
            Ok(Err(ServeError::Rejected(reason))) => {
                tracing::warn!(peer = %peer, reason, "upload rejected");
            }
            Ok(Err(e)) => {
                tracing::debug!(peer = %peer, error = %e, "connection dropped");
            }
            Err(_) => {
                tracing::warn!(peer = %peer, "connection timed out");
            }
        }
    }

    async fn handle(&self, stream: &mut TcpStream, peer: SocketAddr) -> Result<(), ServeError> {
        let mut header = RequestHeader::new_zeroed();
        read_field(stream, &mut header.op).await?;
        let op = header.op()?;
        tracing::debug!(peer = %peer, op = op.code(), "request");

        match op {
            Op::Ping => self.handle_ping(stream).await,
            Op::Upload => {
                let hash = read_hash(stream, &mut header).await?;
                self.handle_upload(stream, peer, hash).await
            }
            Op::Download => {
                let hash = read_hash(stream, &mut header).await?;
                self.handle_download(stream, peer, hash).await
            }
        }
    }

    async fn handle_ping(&self, stream: &mut TcpStream) -> Result<(), ServeError> {
        stream.write_all(PONG).await?;
        stream.shutdown().await?;
        Ok(())
    }

    async fn handle_download(
        &self,
        stream: &mut TcpStream,
        peer: SocketAddr,
        hash: ContentHash,
    ) -> Result<(), ServeError> {
        match self.store.open(&hash).await.map_err(ServeError::Store)? {
            Some(mut file) => {
                let sent = tokio::io::copy(&mut file, stream).await?;
                tracing::debug!(peer = %peer, hash = %hash.short(), bytes = sent, "chunk served");
            }
            None => {
                stream.write_all(NOT_FOUND).await?;
                tracing::debug!(peer = %peer, hash = %hash.short(), "chunk not held");
            }
        }
        stream.shutdown().await?;
        Ok(())
    }

    async fn handle_upload(
        &self,
        stream: &mut TcpStream,
        peer: SocketAddr,
        hash: ContentHash,
    ) -> Result<(), ServeError> {
        let outcome = self
            .store
            .receive(
                &hash,
                stream,
                self.settings.max_chunk_bytes,
                self.settings.verify_on_receive,
            )
            .await
            .map_err(ServeError::Store)?;

        match outcome {
            Received::Stored { bytes } => {
                stream.write_all(STORED).await?;
                stream.shutdown().await?;
                tracing::debug!(peer = %peer, hash = %hash.short(), bytes, "chunk stored");
                Ok(())
            }
            Received::Mismatch { actual, bytes } => Err(ServeError::Rejected(format!(
                "{bytes} bytes claimed as {} hash to {}",
                hash.short(),
                actual.short()
            ))),
            Received::TooLarge { limit } => Err(ServeError::Rejected(format!(
                "chunk {} exceeds {limit} bytes",
                hash.short()
            ))),
        }
    }
}

/// Fill `field` completely. A peer that closes early sent a short header.
async fn read_field<R: AsyncRead + Unpin>(reader: &mut R, field: &mut [u8]) -> Result<(), ServeError> {
    let mut got = 0;
    while got < field.len() {
        let n = reader.read(&mut field[got..]).await?;
        if n == 0 {
            return Err(WireError::ShortHeader {
                expected: field.len(),
                got,
            }
            .into());
        }
        got += n;
    }
    Ok(())
}

async fn read_hash<R: AsyncRead + Unpin>(
    reader: &mut R,
    header: &mut RequestHeader,
) -> Result<ContentHash, ServeError> {
    read_field(reader, &mut header.hash).await?;
    Ok(header.hash()?)
}
