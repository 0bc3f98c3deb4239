//! Publish and fetch: the distributor and collector driven by the tracker.

use std::io;
use std::path::Path;

use chunkmesh_core::config::MeshConfig;
use chunkmesh_core::{FileDescriptor, PeerLocation, PublishReceipt};

use crate::client::PeerClient;
use crate::collect::{CollectReport, Collector};
use crate::distribute::Distributor;
use crate::error::TransferError;
use crate::rotation::without_self;
use crate::tracker::TrackerClient;

/// Name used when a published name has no usable final component.
const FALLBACK_NAME: &str = "download";

#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub receipt: PublishReceipt,
    pub descriptor: FileDescriptor,
}

#[derive(Debug, Clone)]
pub struct Swarm {
    tracker: TrackerClient,
    distributor: Distributor,
    collector: Collector,
    local: Option<PeerLocation>,
}

impl Swarm {
    pub fn new(tracker: TrackerClient, distributor: Distributor, collector: Collector) -> Self {
        Self {
            tracker,
            distributor,
            collector,
            local: None,
        }
    }

    pub fn from_config(config: &MeshConfig) -> Result<Self, TransferError> {
        let tracker = TrackerClient::from_config(&config.tracker)?;
        let client = PeerClient::from_config(config);
        Ok(Self::new(
            tracker,
            Distributor::from_config(client.clone(), config),
            Collector::from_config(client, config),
        ))
    }

    /// Our own listener, left out of every publish.
    pub fn with_local(mut self, local: PeerLocation) -> Self {
        self.local = Some(local);
        self
    }

    pub fn tracker(&self) -> &TrackerClient {
        &self.tracker
    }

    /// Place every chunk of `path` on the swarm, then register the manifest.
    /// Nothing reaches the tracker unless every chunk found a home.
    pub async fn publish(&self, path: &Path) -> Result<PublishOutcome, TransferError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                TransferError::io(
                    "not a file",
                    path,
                    io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
                )
            })?;

        let peers = without_self(&self.tracker.peers().await?, self.local);
        if peers.is_empty() {
            return Err(TransferError::NoPeers);
        }
        tracing::info!(path = %path.display(), peers = peers.len(), "publishing");

        let report = self.distributor.distribute(path, &peers).await?;
        let descriptor = report.into_descriptor(name)?;
        let receipt = self.tracker.publish(&descriptor).await?;

        tracing::info!(
            file_id = receipt.file_id,
            name = %descriptor.name,
            hash = %descriptor.hash,
            chunks = descriptor.chunks.len(),
            "file published"
        );
        Ok(PublishOutcome { receipt, descriptor })
    }

    /// Download file `file_id` into `dest_dir`, named as published.
    pub async fn fetch(&self, file_id: u64, dest_dir: &Path) -> Result<CollectReport, TransferError> {
        let descriptor = self.tracker.file(file_id).await?;
        let dest = dest_dir.join(sanitize_file_name(&descriptor.name));
        tracing::info!(file_id, name = %descriptor.name, chunks = descriptor.chunks.len(), "fetching");

        let report = self.collector.collect(&descriptor, &dest).await?;
        tracing::info!(file_id, path = %report.path.display(), bytes = report.bytes, "file fetched");
        Ok(report)
    }
}

/// Final path component of a tracker-supplied name, so a hostile name
/// cannot write outside the download directory.
pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim_matches(|c: char| c.is_whitespace() || c == '\0');
    match last {
        "" | "." | ".." => FALLBACK_NAME.to_string(),
        other => other.to_string(),
    }
}
