//! Client side of the chunk protocol.
//!
//! One TCP connection per exchange. Every connect is bounded by the connect
//! timeout and everything after it by the io timeout, so a silent peer costs
//! at most their sum.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use zerocopy::AsBytes;

use chunkmesh_core::config::MeshConfig;
use chunkmesh_core::wire::{self, Op, RequestHeader, NOT_FOUND, OP_LEN};
use chunkmesh_core::{ContentHash, PeerLocation};

/// Longest control reply we bother reading (pong, ack).
const CONTROL_REPLY_LIMIT: u64 = 64;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("connect to {peer} timed out")]
    ConnectTimeout { peer: PeerLocation },

    #[error("connect to {peer} failed: {source}")]
    Connect { peer: PeerLocation, source: io::Error },

    #[error("exchange with {peer} timed out")]
    Timeout { peer: PeerLocation },

    #[error("i/o with {peer} failed: {source}")]
    Io { peer: PeerLocation, source: io::Error },

    #[error("{peer} did not acknowledge the upload (reply {reply:?})")]
    NotAcknowledged { peer: PeerLocation, reply: String },

    #[error("{peer} answered ping with {reply:?}")]
    BadPong { peer: PeerLocation, reply: String },

    #[error("reply from {peer} exceeds {limit} bytes")]
    TooLarge { peer: PeerLocation, limit: u64 },
}

/// What a peer answered to `download`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchReply {
    /// Bytes that hash to the requested hash.
    Found(Bytes),
    /// The `not_found` sentinel.
    NotFound,
    /// Anything else. The peer sent bytes that are not the chunk.
    Corrupt { actual: ContentHash, len: usize },
}

#[derive(Debug, Clone)]
pub struct PeerClient {
    connect_timeout: Duration,
    io_timeout: Duration,
    require_ack: bool,
}

impl PeerClient {
    pub fn new(connect_timeout: Duration, io_timeout: Duration, require_ack: bool) -> Self {
        Self {
            connect_timeout,
            io_timeout,
            require_ack,
        }
    }

    pub fn from_config(config: &MeshConfig) -> Self {
        Self::new(
            config.network.connect_timeout(),
            config.network.io_timeout(),
            config.wire.require_upload_ack,
        )
    }

    async fn connect(&self, peer: PeerLocation) -> Result<TcpStream, PeerError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(peer.socket_addr()))
            .await
            .map_err(|_| PeerError::ConnectTimeout { peer })?
            .map_err(|source| PeerError::Connect { peer, source })?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    /// Liveness probe. Succeeds only on an exact `pong`.
    pub async fn ping(&self, peer: PeerLocation) -> Result<(), PeerError> {
        let mut stream = self.connect(peer).await?;
        let reply = timeout(self.io_timeout, async {
            stream.write_all(&Op::Ping.encode()).await?;
            stream.shutdown().await?;
            read_limited(&mut stream, CONTROL_REPLY_LIMIT).await
        })
        .await
        .map_err(|_| PeerError::Timeout { peer })?
        .map_err(|source| PeerError::Io { peer, source })?;

        if wire::is_pong(&reply) {
            Ok(())
        } else {
            Err(PeerError::BadPong {
                peer,
                reply: String::from_utf8_lossy(&reply).into_owned(),
            })
        }
    }

    /// Upload one chunk. The write side is half-closed after the last byte
    /// to mark the end of the payload, then the ack is awaited.
    pub async fn push_chunk(
        &self,
        peer: PeerLocation,
        hash: &ContentHash,
        data: &[u8],
    ) -> Result<(), PeerError> {
        let header = RequestHeader::new(Op::Upload, hash);
        let mut stream = self.connect(peer).await?;
        let reply = timeout(self.io_timeout, async {
            stream.write_all(header.as_bytes()).await?;
            stream.write_all(data).await?;
            stream.shutdown().await?;
            read_limited(&mut stream, CONTROL_REPLY_LIMIT).await
        })
        .await
        .map_err(|_| PeerError::Timeout { peer })?
        .map_err(|source| PeerError::Io { peer, source })?;

        if wire::is_stored(&reply) || (!self.require_ack && reply.is_empty()) {
            tracing::debug!(peer = %peer, hash = %hash.short(), bytes = data.len(), "chunk pushed");
            Ok(())
        } else {
            Err(PeerError::NotAcknowledged {
                peer,
                reply: String::from_utf8_lossy(&reply[..reply.len().min(OP_LEN)]).into_owned(),
            })
        }
    }

    /// Request one chunk. Bytes are only returned as `Found` if they hash to `hash`.
    pub async fn fetch_chunk(
        &self,
        peer: PeerLocation,
        hash: &ContentHash,
        limit: u64,
    ) -> Result<FetchReply, PeerError> {
        let header = RequestHeader::new(Op::Download, hash);
        let mut stream = self.connect(peer).await?;
        let reply = timeout(self.io_timeout, async {
            stream.write_all(header.as_bytes()).await?;
            stream.shutdown().await?;
            read_limited(&mut stream, limit + 1).await
        })
        .await
        .map_err(|_| PeerError::Timeout { peer })?
        .map_err(|source| PeerError::Io { peer, source })?;

        if reply.len() as u64 > limit {
            return Err(PeerError::TooLarge { peer, limit });
        }

        // Data first: a chunk whose bytes are literally "not_found" is still data.
        let actual = ContentHash::of(&reply);
        if actual == *hash {
            return Ok(FetchReply::Found(Bytes::from(reply)));
        }
        if reply == NOT_FOUND {
            return Ok(FetchReply::NotFound);
        }
        Ok(FetchReply::Corrupt {
            actual,
            len: reply.len(),
        })
    }
}

async fn read_limited(stream: &mut TcpStream, limit: u64) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    stream.take(limit).read_to_end(&mut buf).await?;
    Ok(buf)
}
