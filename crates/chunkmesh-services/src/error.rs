//! Failures of a whole publish or fetch.

use std::path::PathBuf;

use chunkmesh_core::manifest::ManifestError;
use chunkmesh_core::ContentHash;

use crate::tracker::TrackerError;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("no peers available")]
    NoPeers,

    /// Every candidate peer rejected these chunks. Nothing was published.
    #[error("upload incomplete: {} of {total} chunks could not be placed", failed.len())]
    UploadIncomplete { failed: Vec<u64>, total: u64 },

    #[error("download incomplete: missing chunks {missing:?}")]
    DownloadIncomplete { missing: Vec<u64> },

    #[error("chunk {index} from {peer} failed verification: expected {expected}, got {actual}")]
    ChunkCorrupt {
        index: u64,
        peer: String,
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("chunk {index} is {actual} bytes, manifest says {expected}")]
    ChunkSize { index: u64, expected: u64, actual: u64 },

    #[error("reassembled file hash {actual} does not match {expected}")]
    FileCorrupt {
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("invalid manifest: {0}")]
    InvalidManifest(#[from] ManifestError),

    #[error("tracker: {0}")]
    Tracker(#[from] TrackerError),

    #[error("{context} {}: {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

impl TransferError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }
}
